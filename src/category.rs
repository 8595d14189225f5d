use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;

/// A node in the category tree returned by `get-categories`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    /// Number of records in this category, summed across plugins.
    pub size: u32,
    pub children: Vec<Category>,
}

impl Category {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: None,
            size: 0,
            children: Vec::new(),
        }
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn with_child(mut self, child: Category) -> Self {
        self.children.push(child);
        self
    }

    /// Fold another node with the same id into this one.
    pub fn merge(&mut self, other: Category) {
        self.size = self.size.saturating_add(other.size);
        if self.icon.is_none() {
            self.icon = other.icon;
        }
        for child in other.children {
            match self.children.iter_mut().find(|c| c.id == child.id) {
                Some(existing) => existing.merge(child),
                None => self.children.push(child),
            }
        }
    }

    fn sort_recursive(&mut self) {
        self.children
            .sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        for child in &mut self.children {
            child.sort_recursive();
        }
    }
}

/// Synchronized sink that plugins of one `get-categories` job add into.
#[derive(Debug, Default)]
pub struct CategoryList {
    inner: Mutex<BTreeMap<String, Category>>,
}

impl CategoryList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a top-level category, merging with an existing one of the same id.
    pub fn add(&self, category: Category) {
        let mut inner = self.inner.lock();
        match inner.get_mut(&category.id) {
            Some(existing) => existing.merge(category),
            None => {
                inner.insert(category.id.clone(), category);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// All categories sorted by name, children included.
    pub fn sorted(&self) -> Vec<Category> {
        let mut categories: Vec<Category> = self.inner.lock().values().cloned().collect();
        for category in &mut categories {
            category.sort_recursive();
        }
        categories.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        categories
    }
}
