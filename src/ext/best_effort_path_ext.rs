use std::path::{Component, Path, PathBuf};

pub fn best_effort_path_display(path: &Path) -> String {
    match path.canonicalize() {
        Ok(canonical_path) => canonical_path.display().to_string(),
        Err(_) => {
            // Entries being removed or not yet written cannot be canonicalized
            let absolute_path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
            normalize_path(&absolute_path).display().to_string()
        }
    }
}

/// Lexically resolves `.` and `..` components without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match components.last() {
                Some(Component::Normal(_)) => {
                    components.pop();
                }
                // `..` above the root is the root itself
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => components.push(component),
            },
            _ => components.push(component),
        }
    }

    if components.is_empty() {
        return PathBuf::from(".");
    }

    components.iter().collect()
}

/// Computes `target` relative to the directory `base`. Both must be absolute
/// and the result is purely lexical.
pub fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let base = normalize_path(base);
    let target = normalize_path(target);

    let base_components: Vec<_> = base.components().collect();
    let target_components: Vec<_> = target.components().collect();

    let common = base_components
        .iter()
        .zip(target_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base_components.len() {
        relative.push("..");
    }
    for component in &target_components[common..] {
        relative.push(component);
    }

    if relative.as_os_str().is_empty() {
        relative.push(".");
    }

    relative
}

pub trait BestEffortPathExt {
    fn best_effort_path_display(&self) -> String;
}

impl BestEffortPathExt for Path {
    fn best_effort_path_display(&self) -> String {
        best_effort_path_display(self)
    }
}

impl BestEffortPathExt for PathBuf {
    fn best_effort_path_display(&self) -> String {
        best_effort_path_display(self)
    }
}

impl BestEffortPathExt for &str {
    fn best_effort_path_display(&self) -> String {
        best_effort_path_display(Path::new(self))
    }
}

impl BestEffortPathExt for String {
    fn best_effort_path_display(&self) -> String {
        best_effort_path_display(Path::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case("/a/b/../c", "/a/c")]
    #[case("/a/./b/", "/a/b")]
    #[case("/../a", "/a")]
    #[case("a/../..", "..")]
    #[case("a/..", ".")]
    fn normalize_path_resolves_dots(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_path(Path::new(input)), PathBuf::from(expected));
    }

    #[rstest]
    #[case("/opt/pkg/bin", "/opt/pkg/lib/libx.so", "../lib/libx.so")]
    #[case("/opt/pkg", "/opt/pkg/share/doc", "share/doc")]
    #[case("/opt/pkg/bin", "/etc/hosts", "../../../etc/hosts")]
    #[case("/opt/pkg", "/opt/pkg", ".")]
    #[case("/opt/./pkg/bin/..", "/opt/pkg/a", "a")]
    fn relative_path_walks_up_from_base(
        #[case] base: &str,
        #[case] target: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(
            relative_path(Path::new(base), Path::new(target)),
            PathBuf::from(expected)
        );
    }

    #[test]
    fn best_effort_display_of_missing_path_is_absolute() {
        let shown = "does/not/../exist".best_effort_path_display();
        assert!(Path::new(&shown).is_absolute());
        assert!(shown.ends_with("does/exist"));
    }
}
