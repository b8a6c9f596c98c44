mod common;

use anyhow::{Context, Result};

use rbac_builder::errors::AppError;
use rbac_builder::store::SecurityStore;

use common::{count, test_pool};

#[tokio::test]
async fn creation_is_find_or_create() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let store = SecurityStore::new(pool.clone());

    let first = store.add_permission_resource("can_edit", "Invoice").await?;
    let second = store.add_permission_resource("can_edit", "Invoice").await?;
    assert_eq!(first.id, second.id);

    let permission = store.add_permission("can_edit").await?;
    assert_eq!(permission.id, first.permission.id);

    assert_eq!(count(&pool, "permission").await?, 1);
    assert_eq!(count(&pool, "resource").await?, 1);
    assert_eq!(count(&pool, "permission_resource").await?, 1);
    Ok(())
}

#[tokio::test]
async fn empty_names_are_rejected_without_partial_rows() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let store = SecurityStore::new(pool.clone());

    let result = store.add_permission_resource("can_edit", "  ").await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));
    assert!(matches!(store.add_role("").await, Err(AppError::BadRequest(_))));

    assert_eq!(count(&pool, "permission").await?, 0);
    assert_eq!(count(&pool, "resource").await?, 0);
    Ok(())
}

#[tokio::test]
async fn grant_and_revoke_are_idempotent() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let store = SecurityStore::new(pool.clone());

    let role = store.add_role("Viewer").await?;
    let pvm = store.add_permission_resource("can_list", "UserView").await?;

    assert!(store.grant_to_role(&role, &pvm).await?);
    assert!(!store.grant_to_role(&role, &pvm).await?);
    assert!(store.role_holds(&role, &pvm).await?);
    assert_eq!(count(&pool, "role_permission_resource").await?, 1);

    assert!(store.revoke_from_role(&role, &pvm).await?);
    assert!(!store.revoke_from_role(&role, &pvm).await?);
    assert!(!store.role_holds(&role, &pvm).await?);
    Ok(())
}

#[tokio::test]
async fn deletes_refuse_while_referenced() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let store = SecurityStore::new(pool.clone());

    let role = store.add_role("Viewer").await?;
    let pvm = store.add_permission_resource("can_edit", "Invoice").await?;
    store.grant_to_role(&role, &pvm).await?;

    let pair = store.delete_permission_resource("can_edit", "Invoice", true).await;
    assert!(matches!(pair, Err(AppError::ReferentialConflict(_))));
    let permission = store.delete_permission("can_edit").await;
    assert!(matches!(permission, Err(AppError::ReferentialConflict(_))));
    let resource = store.delete_resource("Invoice").await;
    assert!(matches!(resource, Err(AppError::ReferentialConflict(_))));

    assert_eq!(count(&pool, "permission").await?, 1);
    assert_eq!(count(&pool, "resource").await?, 1);
    assert_eq!(count(&pool, "permission_resource").await?, 1);
    assert!(store.role_holds(&role, &pvm).await?);
    Ok(())
}

#[tokio::test]
async fn deleting_missing_records_is_not_found() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let store = SecurityStore::new(pool);

    assert!(matches!(store.delete_permission("can_nothing").await, Err(AppError::NotFound(_))));
    assert!(matches!(store.delete_resource("Nowhere").await, Err(AppError::NotFound(_))));
    assert!(matches!(
        store.delete_permission_resource("can_nothing", "Nowhere", false).await,
        Err(AppError::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn cascade_drops_permission_with_its_last_pair() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let store = SecurityStore::new(pool.clone());

    store.add_permission_resource("can_export", "Reports").await?;
    store.add_permission_resource("can_list", "Reports").await?;
    store.add_permission_resource("can_list", "Files").await?;

    store.delete_permission_resource("can_export", "Reports", true).await?;
    assert!(store.find_permission("can_export").await?.is_none());

    // still used on Files
    store.delete_permission_resource("can_list", "Reports", true).await?;
    assert!(store.find_permission("can_list").await?.is_some());

    store.delete_permission_resource("can_list", "Files", false).await?;
    assert!(store.find_permission("can_list").await?.is_some());
    assert_eq!(count(&pool, "permission_resource").await?, 0);
    Ok(())
}

#[tokio::test]
async fn deleting_a_role_removes_its_grants() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let store = SecurityStore::new(pool.clone());

    let role = store.add_role("Temp").await?;
    let pvm = store.add_permission_resource("can_edit", "Invoice").await?;
    store.grant_to_role(&role, &pvm).await?;

    store.delete_role("Temp").await?;
    assert!(store.find_role("Temp").await?.is_none());
    assert_eq!(count(&pool, "role_permission_resource").await?, 0);

    // the pair is free to go now
    store.delete_permission_resource("can_edit", "Invoice", false).await?;
    let resource = store.find_resource("Invoice").await?.context("resource kept")?;
    assert_eq!(resource.name, "Invoice");
    Ok(())
}

#[tokio::test]
async fn lookups_return_pairs_and_holders() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let store = SecurityStore::new(pool);

    let viewer = store.add_role("Viewer").await?;
    let editor = store.add_role("Editor").await?;
    let list = store.add_permission_resource("can_list", "UserView").await?;
    store.add_permission_resource("can_show", "UserView").await?;
    store.grant_to_role(&viewer, &list).await?;
    store.grant_to_role(&editor, &list).await?;

    let on_view: Vec<String> = store
        .permission_resources_on("UserView")
        .await?
        .into_iter()
        .map(|pvm| pvm.permission.name)
        .collect();
    assert_eq!(on_view, vec!["can_list", "can_show"]);

    let holders: Vec<String> = store
        .roles_holding(&list)
        .await?
        .into_iter()
        .map(|role| role.name)
        .collect();
    assert_eq!(holders, vec!["Editor", "Viewer"]);
    Ok(())
}
