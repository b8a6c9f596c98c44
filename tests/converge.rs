mod common;

use std::collections::BTreeSet;

use anyhow::{Context, Result};

use rbac_builder::registry::{MenuLink, Registry, ResourceDescriptor};

use common::{count, grants_of, key, reconciler, test_pool};

fn user_view() -> ResourceDescriptor {
    ResourceDescriptor::new("UserView").operation("list")
}

fn registry_of(descriptors: Vec<ResourceDescriptor>) -> Registry {
    let mut registry = Registry::new();
    for descriptor in descriptors {
        registry.register(descriptor);
    }
    registry
}

#[tokio::test]
async fn syncing_twice_creates_no_duplicates() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let reconciler = reconciler(&pool).await?;

    let mut registry = registry_of(vec![user_view(), ResourceDescriptor::new("Invoice").operation("edit")]);
    registry.add_view(
        ResourceDescriptor::new("Reports").operation("show"),
        MenuLink::new("Reports").href("/reports").category("Analytics"),
    )?;

    reconciler.sync_registry(&registry).await?;
    let permissions = count(&pool, "permission").await?;
    let resources = count(&pool, "resource").await?;
    let pairs = count(&pool, "permission_resource").await?;
    let grants = count(&pool, "role_permission_resource").await?;

    let second = reconciler.sync_registry(&registry).await?;
    assert_eq!(second.grants_added, 0);
    assert_eq!(count(&pool, "permission").await?, permissions);
    assert_eq!(count(&pool, "resource").await?, resources);
    assert_eq!(count(&pool, "permission_resource").await?, pairs);
    assert_eq!(count(&pool, "role_permission_resource").await?, grants);

    let admin = grants_of(reconciler.store(), "Admin").await?;
    assert!(admin.contains(&key("Reports", "can_show")));
    assert!(admin.contains(&key("Reports", "menu_access")));
    assert!(admin.contains(&key("Analytics", "menu_access")));
    Ok(())
}

#[tokio::test]
async fn rename_moves_grants_to_the_new_resource() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let reconciler = reconciler(&pool).await?;
    let store = reconciler.store();

    reconciler.sync_registry(&registry_of(vec![user_view()])).await?;
    let viewer = store.add_role("Viewer").await?;
    let old = store
        .find_permission_resource("can_list", "UserView")
        .await?
        .context("old pair")?;
    store.grant_to_role(&viewer, &old).await?;

    let renamed = registry_of(vec![ResourceDescriptor::new("UserAdmin")
        .previous_name("UserView")
        .operation("list")]);
    let convergence = reconciler.converge(&renamed, false).await?;
    assert!(convergence.report.is_clean(), "{:?}", convergence.report);

    assert_eq!(grants_of(store, "Viewer").await?, BTreeSet::from([key("UserAdmin", "can_list")]));
    assert!(store.find_permission_resource("can_list", "UserView").await?.is_none());
    assert!(store.find_resource("UserView").await?.is_none());
    assert!(store.find_permission("can_list").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn aggregation_folds_old_permissions_into_one() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let reconciler = reconciler(&pool).await?;
    let store = reconciler.store();

    let before = registry_of(vec![ResourceDescriptor::new("Reports").operation("foo").operation("bar")]);
    reconciler.sync_registry(&before).await?;
    let analyst = store.add_role("Analyst").await?;
    let foo = store
        .find_permission_resource("can_foo", "Reports")
        .await?
        .context("foo pair")?;
    store.grant_to_role(&analyst, &foo).await?;

    let after = registry_of(vec![ResourceDescriptor::new("Reports")
        .operation_with_permission("foo", "combo")
        .operation_with_permission("bar", "combo")
        .previous_permission("foo", "foo")
        .previous_permission("bar", "bar")]);

    // seeding must not drop pairs still waiting to be migrated
    reconciler.sync_registry(&after).await?;
    assert!(store.find_permission_resource("can_foo", "Reports").await?.is_some());

    let convergence = reconciler.converge(&after, false).await?;
    assert!(convergence.report.is_clean(), "{:?}", convergence.report);

    assert_eq!(grants_of(store, "Analyst").await?, BTreeSet::from([key("Reports", "can_combo")]));
    assert!(store.find_permission("can_foo").await?.is_none());
    assert!(store.find_permission("can_bar").await?.is_none());
    assert!(store.find_resource("Reports").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn admin_holds_every_required_pair_after_converge() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let reconciler = reconciler(&pool).await?;

    let registry = registry_of(vec![
        ResourceDescriptor::new("Invoice").operation("edit").operation("delete"),
        ResourceDescriptor::new("UserAdmin").previous_name("UserView").operation("list"),
    ]);
    reconciler.converge(&registry, false).await?;

    let admin = grants_of(reconciler.store(), "Admin").await?;
    for descriptor in registry.descriptors() {
        for permission in descriptor.required_permissions() {
            assert!(
                admin.contains(&key(descriptor.name(), &permission)),
                "admin is missing {}.{}",
                descriptor.name(),
                permission
            );
        }
    }
    Ok(())
}

#[tokio::test]
async fn converge_is_idempotent() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let reconciler = reconciler(&pool).await?;
    let store = reconciler.store();

    reconciler.sync_registry(&registry_of(vec![user_view()])).await?;
    let viewer = store.add_role("Viewer").await?;
    let old = store
        .find_permission_resource("can_list", "UserView")
        .await?
        .context("old pair")?;
    store.grant_to_role(&viewer, &old).await?;

    let renamed = registry_of(vec![ResourceDescriptor::new("UserAdmin")
        .previous_name("UserView")
        .operation("list")]);
    reconciler.converge(&renamed, false).await?;
    let grants = count(&pool, "role_permission_resource").await?;

    let again = reconciler.converge(&renamed, false).await?;
    assert_eq!(again.report.grants_added, 0);
    assert_eq!(again.report.grants_revoked, 0);
    assert_eq!(again.report.records_deleted, 0);
    assert!(again.report.is_clean());
    assert_eq!(count(&pool, "role_permission_resource").await?, grants);
    Ok(())
}

#[tokio::test]
async fn dry_run_leaves_the_store_untouched() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let reconciler = reconciler(&pool).await?;
    let store = reconciler.store();

    reconciler.sync_registry(&registry_of(vec![user_view()])).await?;
    let renamed = registry_of(vec![ResourceDescriptor::new("UserAdmin")
        .previous_name("UserView")
        .operation("list")]);

    let convergence = reconciler.converge(&renamed, true).await?;
    assert!(convergence.dry);
    assert!(convergence.plan.add.contains_key(&key("UserView", "can_list")));
    assert!(store.find_resource("UserAdmin").await?.is_none());
    assert!(store.find_permission_resource("can_list", "UserView").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn seeding_drops_pairs_no_longer_required() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let reconciler = reconciler(&pool).await?;
    let store = reconciler.store();

    let mut before = Registry::new();
    before.add_view(
        ResourceDescriptor::new("Invoice").operation("edit").operation("void"),
        MenuLink::new("Invoice").href("/invoices"),
    )?;
    reconciler.sync_registry(&before).await?;
    let clerk = store.add_role("Clerk").await?;
    let void = store
        .find_permission_resource("can_void", "Invoice")
        .await?
        .context("void pair")?;
    store.grant_to_role(&clerk, &void).await?;

    let mut after = Registry::new();
    after.add_view(
        ResourceDescriptor::new("Invoice").operation("edit"),
        MenuLink::new("Invoice").href("/invoices"),
    )?;
    reconciler.sync_registry(&after).await?;

    assert!(store.find_permission_resource("can_void", "Invoice").await?.is_none());
    assert!(store.find_permission("can_void").await?.is_none());
    assert!(grants_of(store, "Clerk").await?.is_empty());
    // a descriptor sharing its name with a menu entry keeps menu access
    assert!(store.find_permission_resource("menu_access", "Invoice").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn renamed_aggregate_migrates_every_old_grant() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let reconciler = reconciler(&pool).await?;
    let store = reconciler.store();

    let before = registry_of(vec![ResourceDescriptor::new("UserView")
        .operation("foo")
        .operation("combo")]);
    reconciler.sync_registry(&before).await?;
    let viewer = store.add_role("Viewer").await?;
    let combo = store
        .find_permission_resource("can_combo", "UserView")
        .await?
        .context("combo pair")?;
    store.grant_to_role(&viewer, &combo).await?;

    let after = registry_of(vec![ResourceDescriptor::new("UserAdmin")
        .previous_name("UserView")
        .operation_with_permission("foo", "combo")
        .operation_with_permission("baz", "combo")
        .previous_permission("foo", "foo")]);
    let convergence = reconciler.converge(&after, false).await?;
    assert!(convergence.report.is_clean(), "{:?}", convergence.report);

    assert_eq!(grants_of(store, "Viewer").await?, BTreeSet::from([key("UserAdmin", "can_combo")]));
    assert!(store.find_permission_resource("can_combo", "UserView").await?.is_none());
    assert!(store.find_resource("UserView").await?.is_none());
    assert!(store.find_permission("can_foo").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn a_failing_write_does_not_stop_the_pass() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let reconciler = reconciler(&pool).await?;
    let store = reconciler.store();

    let before = registry_of(vec![user_view(), ResourceDescriptor::new("Legacy").operation("list")]);
    reconciler.sync_registry(&before).await?;
    let clerk = store.add_role("Clerk").await?;
    for resource in ["UserView", "Legacy"] {
        let pvm = store
            .find_permission_resource("can_list", resource)
            .await?
            .context("old pair")?;
        store.grant_to_role(&clerk, &pvm).await?;
    }

    sqlx::query(
        "CREATE TRIGGER block_broken BEFORE INSERT ON resource WHEN NEW.name = 'Broken' \
         BEGIN SELECT RAISE(ABORT, 'resource Broken is blocked'); END",
    )
    .execute(&pool)
    .await?;

    let after = registry_of(vec![
        ResourceDescriptor::new("UserAdmin").previous_name("UserView").operation("list"),
        ResourceDescriptor::new("Broken").previous_name("Legacy").operation("list"),
        ResourceDescriptor::new("Reports").operation("show"),
    ]);
    let report = reconciler.converge(&after, false).await?.report;

    // Admin and Clerk migrations, then the admin top up
    assert_eq!(report.failures.len(), 3, "{:?}", report.failures);
    assert!(report.failures.iter().all(|failure| failure.contains("Broken")));

    // independent transitions still ran
    assert_eq!(grants_of(store, "Clerk").await?, BTreeSet::from([key("UserAdmin", "can_list")]));
    assert!(store.find_resource("UserView").await?.is_none());
    assert!(store.find_resource("Broken").await?.is_none());

    // the top up carried on past the failing descriptor
    let admin = grants_of(store, "Admin").await?;
    assert!(admin.contains(&key("UserAdmin", "can_list")));
    assert!(admin.contains(&key("Reports", "can_show")));
    Ok(())
}
