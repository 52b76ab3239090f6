use std::fmt;

use colored::Colorize;

use crate::filetree::tree::{Node, Tree};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, &mut Vec::new())
    }
}

impl Tree {
    /// `bars[i]` tells whether the ancestor at depth `i` still has siblings
    /// below it, which decides between a `│` guide and blank padding.
    fn render(&self, f: &mut fmt::Formatter<'_>, bars: &mut Vec<bool>) -> fmt::Result {
        self.render_label(f)?;

        let Some(children) = self.children() else {
            return Ok(());
        };

        let last = children.len().saturating_sub(1);
        for (index, child) in children.values().enumerate() {
            writeln!(f)?;
            for &bar in bars.iter() {
                f.write_str(if bar { "│   " } else { "    " })?;
            }

            let is_last = index == last;
            f.write_str(if is_last { "└── " } else { "├── " })?;

            bars.push(!is_last);
            child.render(f, bars)?;
            bars.pop();
        }

        Ok(())
    }

    fn render_label(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Node::Dir { .. } => write!(f, "{}", self.name.truecolor(254, 40, 162)),
            Node::File { content, .. } => write!(
                f,
                "{} {}",
                self.name,
                format!("{{{}}}", human_size(content.len() as u64)).green()
            ),
            Node::SymLink { target } => {
                write!(f, "{} {}", self.name, format!("{{{target}}}").cyan())
            }
        }
    }
}

pub fn human_size(bytes: u64) -> String {
    if bytes > MIB {
        format!("{:.2} MB", bytes as f64 / MIB as f64)
    } else if bytes > KIB {
        format!("{:.2} KB", bytes as f64 / KIB as f64)
    } else {
        bytes.to_string()
    }
}
