//! Browsable hierarchy built from flat `/`-delimited resource names.

use std::fmt::Write;

use avafs_common::hash::file_extension_hash;

/// A leaf of a [`DirectoryTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeFile {
    /// Last path component.
    pub name: String,
    /// Full resource name as inserted.
    pub path: String,
    /// Hash of the file extension, used to pick a format handler.
    pub extension_hash: u32,
}

/// A folder with nested folders and files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryTree {
    name: String,
    path: String,
    folders: Vec<DirectoryTree>,
    files: Vec<TreeFile>,
}

impl DirectoryTree {
    /// Create an empty root.
    pub fn new() -> Self {
        Self::default()
    }

    fn folder(name: &str, path: &str) -> Self {
        Self {
            name: name.to_owned(),
            path: path.to_owned(),
            ..Self::default()
        }
    }

    /// Folder name, empty for the root.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path from the root to this folder.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Direct subfolders.
    #[inline]
    pub fn folders(&self) -> &[DirectoryTree] {
        &self.folders
    }

    /// Files directly in this folder.
    #[inline]
    pub fn files(&self) -> &[TreeFile] {
        &self.files
    }

    /// Total number of files below this folder.
    pub fn file_count(&self) -> usize {
        self.files.len() + self.folders.iter().map(Self::file_count).sum::<usize>()
    }

    /// Whether nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.folders.is_empty()
    }

    /// Insert a resource name, creating folders for each leading component.
    pub fn insert(&mut self, full_path: &str) {
        let mut node = self;
        let mut rest = full_path;
        let mut consumed = 0usize;

        while let Some(slash) = rest.find('/') {
            let directory = &rest[..slash];
            consumed += slash;
            let folder_path = &full_path[..consumed];

            let index = match node.folders.iter().position(|f| f.name == directory) {
                Some(index) => index,
                None => {
                    node.folders.push(Self::folder(directory, folder_path));
                    node.folders.len() - 1
                }
            };

            node = &mut node.folders[index];
            rest = &rest[slash + 1..];
            consumed += 1;
        }

        node.files.push(TreeFile {
            name: rest.to_owned(),
            path: full_path.to_owned(),
            extension_hash: file_extension_hash(rest),
        });
    }

    /// Sort folders and files by name, recursively.
    pub fn sort(&mut self) {
        self.folders.sort_by(|a, b| a.name.cmp(&b.name));
        self.files.sort_by(|a, b| a.name.cmp(&b.name));

        for folder in &mut self.folders {
            folder.sort();
        }
    }

    /// Whether any file below this folder contains `filter` in its name.
    ///
    /// Matching is a case-sensitive substring test on file names only.
    pub fn matches(&self, filter: &str) -> bool {
        self.files.iter().any(|f| f.name.contains(filter))
            || self.folders.iter().any(|folder| folder.matches(filter))
    }

    /// Walk the visible hierarchy depth first, folders before files.
    ///
    /// `depth` starts at 0 for the children of this node. With a filter,
    /// folders without a matching descendant and non-matching files are
    /// skipped.
    pub fn visit<F>(&self, filter: Option<&str>, visitor: &mut F)
    where
        F: FnMut(TreeItem<'_>, usize),
    {
        self.visit_at(filter, 0, visitor);
    }

    fn visit_at<F>(&self, filter: Option<&str>, depth: usize, visitor: &mut F)
    where
        F: FnMut(TreeItem<'_>, usize),
    {
        for folder in &self.folders {
            if filter.is_some_and(|f| !folder.matches(f)) {
                continue;
            }
            visitor(TreeItem::Folder(folder), depth);
            folder.visit_at(filter, depth + 1, visitor);
        }

        for file in &self.files {
            if filter.is_some_and(|f| !file.name.contains(f)) {
                continue;
            }
            visitor(TreeItem::File(file), depth);
        }
    }

    /// Render the visible hierarchy as indented text.
    pub fn render(&self, filter: Option<&str>) -> String {
        let mut out = String::new();
        self.visit(filter, &mut |item, depth| {
            let indent = depth * 2;
            let _ = match item {
                TreeItem::Folder(folder) => writeln!(out, "{:indent$}{}/", "", folder.name),
                TreeItem::File(file) => writeln!(out, "{:indent$}{}", "", file.name),
            };
        });
        out
    }
}

impl<S: AsRef<str>> FromIterator<S> for DirectoryTree {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut tree = Self::new();
        for name in iter {
            tree.insert(name.as_ref());
        }
        tree.sort();
        tree
    }
}

/// A node yielded by [`DirectoryTree::visit`].
#[derive(Debug, Clone, Copy)]
pub enum TreeItem<'a> {
    Folder(&'a DirectoryTree),
    File(&'a TreeFile),
}

#[cfg(test)]
mod tests {
    use super::*;
    use avafs_common::hash::hash_str;
    use proptest::prelude::*;

    #[test]
    fn test_insert_builds_folders() {
        let mut tree = DirectoryTree::new();
        tree.insert("models/jc_characters/foo.mesh");
        tree.insert("models/jc_characters/bar.mesh");
        tree.insert("models/root.ee");
        tree.insert("top.bin");

        assert_eq!(tree.file_count(), 4);
        assert_eq!(tree.files()[0].name, "top.bin");

        let models = &tree.folders()[0];
        assert_eq!(models.name(), "models");
        assert_eq!(models.path(), "models");
        assert_eq!(models.files()[0].path, "models/root.ee");
        assert_eq!(models.files()[0].extension_hash, hash_str("ee"));

        let characters = &models.folders()[0];
        assert_eq!(characters.path(), "models/jc_characters");
        assert_eq!(characters.files().len(), 2);
    }

    #[test]
    fn test_folder_path_with_repeated_component() {
        let mut tree = DirectoryTree::new();
        tree.insert("a/b/a/file.txt");

        let inner = &tree.folders()[0].folders()[0].folders()[0];
        assert_eq!(inner.name(), "a");
        assert_eq!(inner.path(), "a/b/a");
    }

    #[test]
    fn test_sort() {
        let tree: DirectoryTree = ["z/1", "a/2", "m", "b"].into_iter().collect();

        let folders: Vec<_> = tree.folders().iter().map(|f| f.name()).collect();
        let files: Vec<_> = tree.files().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(folders, ["a", "z"]);
        assert_eq!(files, ["b", "m"]);
    }

    #[test]
    fn test_render_filter() {
        let tree: DirectoryTree = [
            "models/foo.mesh",
            "models/bar.mesh",
            "textures/foo.ddsc",
            "textures/grass.ddsc",
        ]
        .into_iter()
        .collect();

        assert_eq!(
            tree.render(Some("foo")),
            "models/\n  foo.mesh\ntextures/\n  foo.ddsc\n"
        );
        assert_eq!(tree.render(Some("grass")), "textures/\n  grass.ddsc\n");
        assert_eq!(tree.render(Some("FOO")), "");
        assert_eq!(tree.render(None).lines().count(), 6);
    }

    fn collect_levels(tree: &DirectoryTree, out: &mut Vec<Vec<String>>) {
        out.push(tree.folders().iter().map(|f| f.name().to_owned()).collect());
        out.push(tree.files().iter().map(|f| f.name.clone()).collect());
        for folder in tree.folders() {
            collect_levels(folder, out);
        }
    }

    proptest! {
        #[test]
        fn prop_sorted_at_every_level(names in prop::collection::vec("[a-c]{1,2}(/[a-c]{1,2}){0,3}", 0..40)) {
            let tree: DirectoryTree = names.iter().collect();

            let mut levels = Vec::new();
            collect_levels(&tree, &mut levels);
            for level in levels {
                prop_assert!(level.windows(2).all(|w| w[0] <= w[1]));
            }
            prop_assert_eq!(tree.file_count(), names.len());
        }
    }
}
