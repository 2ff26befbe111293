//! Directory-tree rendering: unicode box-drawing, directories before files,
//! alphabetical within each group, structure only.

use std::collections::BTreeMap;

use crate::core::file::FileDescriptor;
use crate::output::RenderOptions;

#[derive(Default)]
struct Node {
    dirs: BTreeMap<String, Node>,
    files: Vec<(String, u64)>,
}

impl Node {
    fn insert(&mut self, components: &[&str], size: u64) {
        match components {
            [] => {}
            [file] => self.files.push((file.to_string(), size)),
            [dir, rest @ ..] => self
                .dirs
                .entry(dir.to_string())
                .or_default()
                .insert(rest, size),
        }
    }
}

pub fn render(files: &[FileDescriptor], options: &RenderOptions) -> String {
    let entries: Vec<(String, u64)> = files
        .iter()
        .map(|f| (f.rel_path.to_string(), f.size))
        .collect();
    render_entries(&entries, options.show_sizes)
}

/// Render from bare `(relative path, size)` pairs; used by formats that
/// embed a structure section without holding descriptors.
pub(crate) fn render_entries(entries: &[(String, u64)], show_sizes: bool) -> String {
    let mut root = Node::default();
    for (path, size) in entries {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        root.insert(&components, *size);
    }

    let mut out = String::from(".\n");
    render_node(&root, "", show_sizes, &mut out);
    out
}

fn render_node(node: &Node, prefix: &str, show_sizes: bool, out: &mut String) {
    let mut files = node.files.clone();
    files.sort();

    let total = node.dirs.len() + files.len();
    let mut index = 0_usize;

    for (name, child) in &node.dirs {
        index += 1;
        let last = index == total;
        let connector = if last { "└── " } else { "├── " };
        out.push_str(prefix);
        out.push_str(connector);
        out.push_str(name);
        out.push_str("/\n");

        let extension = if last { "    " } else { "│   " };
        let child_prefix = format!("{prefix}{extension}");
        render_node(child, &child_prefix, show_sizes, out);
    }

    for (name, size) in &files {
        index += 1;
        let connector = if index == total { "└── " } else { "├── " };
        out.push_str(prefix);
        out.push_str(connector);
        out.push_str(name);
        if show_sizes {
            out.push_str(&format!(" ({size} B)"));
        }
        out.push('\n');
    }
}
