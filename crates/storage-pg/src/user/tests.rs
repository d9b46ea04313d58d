// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use avs_storage::{
    RepositoryAccess, RepositoryTransaction,
    clock::MockClock,
    user::{UserEmailRepository, UserRepository},
};
use rand::SeedableRng;
use rand_chacha::ChaChaRng;
use sqlx::PgPool;

use crate::PgRepository;

/// Test the user repository, by adding and looking up a user
#[sqlx::test(migrator = "crate::MIGRATOR")]
#[ignore = "requires a PostgreSQL database"]
async fn test_user_repo(pool: PgPool) {
    const USERNAME: &str = "john";

    let mut repo = PgRepository::from_pool(&pool).await.unwrap().boxed();
    let mut rng = ChaChaRng::seed_from_u64(42);
    let clock = MockClock::default();

    // Initially, the user shouldn't exist
    assert!(
        repo.user()
            .find_by_username(USERNAME)
            .await
            .unwrap()
            .is_none()
    );

    // Adding the user should work
    let user = repo
        .user()
        .add(&mut rng, &clock, USERNAME.to_owned())
        .await
        .unwrap();

    // And now it should exist
    assert_eq!(
        repo.user().find_by_username(USERNAME).await.unwrap(),
        Some(user.clone())
    );
    assert_eq!(repo.user().lookup(user.id).await.unwrap(), Some(user.clone()));

    // Adding a second time should give a conflict
    // It should not poison the transaction though
    assert!(
        repo.user()
            .add(&mut rng, &clock, USERNAME.to_owned())
            .await
            .is_err()
    );

    // No display name by default
    assert!(repo.user().display_name(&user).await.unwrap().is_none());

    repo.user()
        .set_display_name(&user, Some("John Doe".to_owned()))
        .await
        .unwrap();
    assert_eq!(
        repo.user().display_name(&user).await.unwrap().as_deref(),
        Some("John Doe")
    );

    repo.user().set_display_name(&user, None).await.unwrap();
    assert!(repo.user().display_name(&user).await.unwrap().is_none());

    repo.save().await.unwrap();
}

/// Test the user email repository
#[sqlx::test(migrator = "crate::MIGRATOR")]
#[ignore = "requires a PostgreSQL database"]
async fn test_user_email_repo(pool: PgPool) {
    let mut repo = PgRepository::from_pool(&pool).await.unwrap().boxed();
    let mut rng = ChaChaRng::seed_from_u64(42);
    let clock = MockClock::default();

    let user = repo
        .user()
        .add(&mut rng, &clock, "john".to_owned())
        .await
        .unwrap();

    assert!(repo.user_email().all(&user).await.unwrap().is_empty());

    let first = repo
        .user_email()
        .add(&mut rng, &clock, &user, "john@example.com".to_owned())
        .await
        .unwrap();
    clock.advance(chrono::Duration::seconds(1));
    let second = repo
        .user_email()
        .add(&mut rng, &clock, &user, "john@example.org".to_owned())
        .await
        .unwrap();

    // Emails are returned in insertion order
    let all = repo.user_email().all(&user).await.unwrap();
    assert_eq!(all, vec![first, second]);

    repo.save().await.unwrap();
}
