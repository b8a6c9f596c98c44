use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

pub const SEPARATOR: &str = "-";

/// Node of the navigation tree. An item with children is a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuItem {
    pub name: String,
    pub href: String,
    pub icon: String,
    pub label: String,
    pub children: Vec<MenuItem>,
}

impl MenuItem {
    fn new(name: &str, href: &str, icon: &str, label: &str) -> Self {
        Self {
            name: name.to_string(),
            href: href.to_string(),
            icon: icon.to_string(),
            label: if label.is_empty() { name.to_string() } else { label.to_string() },
            children: Vec::new(),
        }
    }

    fn separator() -> Self {
        Self::new(SEPARATOR, "", "", "")
    }

    pub fn is_separator(&self) -> bool {
        self.name == SEPARATOR
    }

    pub fn is_category(&self) -> bool {
        !self.children.is_empty()
    }
}

/// Declaration of a menu link, optionally placed under a category that is
/// created on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuLink {
    pub name: String,
    #[serde(default)]
    pub href: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub category_icon: String,
    #[serde(default)]
    pub category_label: String,
    #[serde(default)]
    pub parent_category: String,
}

impl MenuLink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn href(mut self, href: impl Into<String>) -> Self {
        self.href = href.into();
        self
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}

/// Filtered menu as served to a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MenuEntry {
    Separator,
    Category {
        name: String,
        icon: String,
        label: String,
        children: Vec<MenuEntry>,
    },
    Link {
        name: String,
        icon: String,
        label: String,
        url: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Menu {
    items: Vec<MenuItem>,
}

impl Menu {
    pub fn items(&self) -> &[MenuItem] {
        &self.items
    }

    /// Names of every item in the tree, depth first, separators excluded.
    pub fn flat_names(&self) -> Vec<String> {
        fn walk(items: &[MenuItem], out: &mut Vec<String>) {
            for item in items {
                if !item.is_separator() {
                    out.push(item.name.clone());
                }
                walk(&item.children, out);
            }
        }

        let mut names = Vec::new();
        walk(&self.items, &mut names);
        names
    }

    pub fn find(&self, name: &str) -> Option<&MenuItem> {
        fn walk<'a>(items: &'a [MenuItem], name: &str) -> Option<&'a MenuItem> {
            for item in items {
                if item.name == name {
                    return Some(item);
                }
                if let Some(found) = walk(&item.children, name) {
                    return Some(found);
                }
            }
            None
        }

        walk(&self.items, name)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut MenuItem> {
        fn walk<'a>(items: &'a mut [MenuItem], name: &str) -> Option<&'a mut MenuItem> {
            for item in items {
                if item.name == name {
                    return Some(item);
                }
                if let Some(found) = walk(&mut item.children, name) {
                    return Some(found);
                }
            }
            None
        }

        walk(&mut self.items, name)
    }

    pub fn add_category(
        &mut self,
        category: &str,
        icon: &str,
        label: &str,
        parent_category: &str,
    ) -> AppResult<()> {
        let item = MenuItem::new(category, "", icon, label);
        if parent_category.is_empty() {
            self.items.push(item);
            return Ok(());
        }
        match self.find_mut(parent_category) {
            Some(parent) => {
                parent.children.push(item);
                Ok(())
            }
            None => Err(AppError::not_found(format!(
                "menu category {parent_category} for {category} does not exist"
            ))),
        }
    }

    pub fn add_link(&mut self, link: MenuLink) -> AppResult<()> {
        let item = MenuItem::new(&link.name, &link.href, &link.icon, &link.label);
        if link.category.is_empty() {
            self.items.push(item);
            return Ok(());
        }
        if self.find(&link.category).is_none() {
            self.add_category(
                &link.category,
                &link.category_icon,
                &link.category_label,
                &link.parent_category,
            )?;
        }
        match self.find_mut(&link.category) {
            Some(category) => {
                category.children.push(item);
                Ok(())
            }
            None => Err(AppError::internal(format!("menu category {} vanished", link.category))),
        }
    }

    pub fn add_separator(&mut self, category: &str) -> AppResult<()> {
        match self.find_mut(category) {
            Some(item) => {
                item.children.push(MenuItem::separator());
                Ok(())
            }
            None => Err(AppError::bad_request(format!(
                "menu separator does not have a valid category {category}"
            ))),
        }
    }

    pub fn filter(&self, visible: &BTreeSet<String>) -> Vec<MenuEntry> {
        filter_items(&self.items, visible)
    }
}

/// Filters a list of items down to what `visible` allows.
///
/// Separators survive unless they close the list. A category that passes keeps
/// its place even when none of its children do.
pub fn filter_items(items: &[MenuItem], visible: &BTreeSet<String>) -> Vec<MenuEntry> {
    let last = items.len().saturating_sub(1);
    let mut entries = Vec::new();

    for (index, item) in items.iter().enumerate() {
        if item.is_separator() && index != last {
            entries.push(MenuEntry::Separator);
            continue;
        }
        if !visible.contains(&item.name) {
            continue;
        }
        if item.is_category() {
            entries.push(MenuEntry::Category {
                name: item.name.clone(),
                icon: item.icon.clone(),
                label: item.label.clone(),
                children: filter_items(&item.children, visible),
            });
        } else {
            entries.push(MenuEntry::Link {
                name: item.name.clone(),
                icon: item.icon.clone(),
                label: item.label.clone(),
                url: item.href.clone(),
            });
        }
    }

    entries
}

/// Named group of menu entries shown beside the main menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SideGroup {
    pub name: String,
    pub href: String,
    pub label: String,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SideEntry {
    pub name: String,
    pub href: String,
    pub label: String,
    pub items: Vec<MenuEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct Side {
    groups: Vec<SideGroup>,
}

impl Side {
    pub fn add_group(&mut self, name: &str, href: &str, label: &str) {
        if self.find(name).is_some() {
            return;
        }
        self.groups.push(SideGroup {
            name: name.to_string(),
            href: href.to_string(),
            label: if label.is_empty() { name.to_string() } else { label.to_string() },
            items: Vec::new(),
        });
    }

    /// Appends a menu entry name to a group. Returns false when the group is unknown.
    pub fn add_to_group(&mut self, group: &str, item: &str) -> bool {
        match self.groups.iter_mut().find(|g| g.name == group) {
            Some(group) => {
                group.items.push(item.to_string());
                true
            }
            None => false,
        }
    }

    pub fn find(&self, name: &str) -> Option<&SideGroup> {
        self.groups.iter().find(|group| group.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = String> + '_ {
        self.groups.iter().map(|group| group.name.clone())
    }

    /// Visible groups in registration order, each holding its filtered entries.
    /// Item names that no longer resolve in `menu` are skipped.
    pub fn render(&self, menu: &Menu, visible: &BTreeSet<String>) -> Vec<SideEntry> {
        self.groups
            .iter()
            .filter(|group| visible.contains(&group.name))
            .map(|group| {
                let resolved: Vec<MenuItem> = group
                    .items
                    .iter()
                    .filter_map(|name| menu.find(name).cloned())
                    .collect();
                SideEntry {
                    name: group.name.clone(),
                    href: group.href.clone(),
                    label: group.label.clone(),
                    items: filter_items(&resolved, visible),
                }
            })
            .collect()
    }
}
