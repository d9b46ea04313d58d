// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Plumbing shared by the repository traits

/// Wraps a repository and converts every error it returns with `mapper`
///
/// Backends use it to turn their own error type into a
/// [`crate::RepositoryError`] when they get boxed.
pub struct MapErr<R, F> {
    pub(crate) inner: R,
    pub(crate) mapper: F,
}

impl<R, F> MapErr<R, F> {
    /// Wrap `inner`, passing its errors through `mapper`
    #[must_use]
    pub fn new(inner: R, mapper: F) -> Self {
        Self { inner, mapper }
    }
}

/// Forwards a repository trait through [`Box<R>`] and [`MapErr`]
///
/// Takes the trait name followed by its method signatures. Every method must
/// take `&mut self` and return `Result<_, Self::Error>`.
#[macro_export]
macro_rules! repository_impl {
    ($trait_name:ident:
        $(
            async fn $fn_name:ident (
                &mut self
                $(, $param:ident: $param_ty:ty )*
                $(,)?
            ) -> Result<$ok:ty, Self::Error>;
        )*
    ) => {
        #[::async_trait::async_trait]
        impl<Inner> $trait_name for ::std::boxed::Box<Inner>
        where
            Inner: $trait_name + ?Sized,
        {
            type Error = Inner::Error;

            $(
                async fn $fn_name(&mut self $(, $param: $param_ty)*) -> Result<$ok, Self::Error> {
                    Inner::$fn_name(&mut **self $(, $param)*).await
                }
            )*
        }

        #[::async_trait::async_trait]
        impl<Inner, Mapper, Err> $trait_name for $crate::MapErr<Inner, Mapper>
        where
            Inner: $trait_name,
            Mapper: FnMut(Inner::Error) -> Err + ::std::marker::Send + ::std::marker::Sync,
        {
            type Error = Err;

            $(
                async fn $fn_name(&mut self $(, $param: $param_ty)*) -> Result<$ok, Self::Error> {
                    let res = self.inner.$fn_name($($param),*).await;
                    res.map_err(|e| (self.mapper)(e))
                }
            )*
        }
    };
}
