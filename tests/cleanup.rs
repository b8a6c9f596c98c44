mod common;

use anyhow::{Context, Result};

use rbac_builder::registry::{MenuLink, Registry, ResourceDescriptor};

use common::{grants_of, reconciler, test_pool};

#[tokio::test]
async fn orphaned_resources_are_removed_and_stay_removed() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let reconciler = reconciler(&pool).await?;
    let store = reconciler.store();

    let mut before = Registry::new();
    before.register(ResourceDescriptor::new("Invoice").operation("edit"));
    before.register(ResourceDescriptor::new("Legacy").operation("show"));
    before.add_side_group("Finance", "", "", &[]);
    reconciler.sync_registry(&before).await?;

    let clerk = store.add_role("Clerk").await?;
    let legacy = store
        .find_permission_resource("can_show", "Legacy")
        .await?
        .context("legacy pair")?;
    store.grant_to_role(&clerk, &legacy).await?;

    let mut after = Registry::new();
    after.register(ResourceDescriptor::new("Invoice").operation("edit"));
    after.add_side_group("Finance", "", "", &[]);

    let cleanup = reconciler.cleanup(&after).await?;
    assert_eq!(cleanup.orphans, vec!["Legacy".to_string()]);
    assert!(cleanup.convergence.report.is_clean(), "{:?}", cleanup.convergence.report);

    assert!(store.find_resource("Legacy").await?.is_none());
    assert!(store.find_permission("can_show").await?.is_none());
    assert!(grants_of(store, "Clerk").await?.is_empty());

    // registered and referenced names survive
    assert!(store.find_resource("Invoice").await?.is_some());
    assert!(store.find_resource("Finance").await?.is_some());

    reconciler.converge(&after, false).await?;
    assert!(store.find_resource("Legacy").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn menu_only_resources_are_kept() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let reconciler = reconciler(&pool).await?;
    let store = reconciler.store();

    let mut registry = Registry::new();
    registry
        .menu_mut()
        .add_link(MenuLink::new("Docs").href("https://docs.example.com").category("Help"))?;
    reconciler.sync_registry(&registry).await?;
    store.add_resource("Stray").await?;

    let cleanup = reconciler.cleanup(&registry).await?;
    assert_eq!(cleanup.orphans, vec!["Stray".to_string()]);
    assert!(store.find_permission_resource("menu_access", "Docs").await?.is_some());
    assert!(store.find_permission_resource("menu_access", "Help").await?.is_some());
    Ok(())
}
