//! Deterministic artifact and archive naming.

use gantry_core::run::AxisAssignment;
use gantry_core::workflow::{ArchiveFormat, PromotionSpec};

/// Logical artifact name: `<product>-<classifier>-<axis values...>`.
///
/// Only the axes listed in `name_axes` contribute, in that order. Without a
/// list every axis of the assignment contributes in declaration order.
pub fn artifact_name(spec: &PromotionSpec, assignment: &AxisAssignment) -> String {
    let mut parts = vec![sanitize(&spec.product), sanitize(&spec.classifier)];

    match &spec.name_axes {
        Some(axes) => {
            for axis in axes {
                if let Some(value) = assignment.get(axis) {
                    parts.push(sanitize(value));
                }
            }
        }
        None => parts.extend(assignment.iter().map(|(_, value)| sanitize(value))),
    }

    parts.retain(|p| !p.is_empty());
    parts.join("-")
}

/// File name of the compressed archive for a logical name.
pub fn archive_name(logical_name: &str, format: ArchiveFormat) -> String {
    format!("{}.{}", logical_name, format.extension())
}

/// Sanitize a name component for use in filenames.
pub fn sanitize(part: &str) -> String {
    part.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::condition::Condition;

    fn spec(name_axes: Option<Vec<&str>>) -> PromotionSpec {
        PromotionSpec {
            product: "cutevariant".into(),
            classifier: "standalone".into(),
            output_dir: "dist".into(),
            name_axes: name_axes.map(|a| a.into_iter().map(String::from).collect()),
            format: ArchiveFormat::Zip,
            package_if: None,
            upload: None,
            publish_if: Condition::publish_gate(),
        }
    }

    #[test]
    fn test_artifact_name_from_selected_axes() {
        let assignment = AxisAssignment::new()
            .with("architecture", "x64")
            .with("python_version", "3.8");
        let name = artifact_name(&spec(Some(vec!["architecture"])), &assignment);
        assert_eq!(name, "cutevariant-standalone-x64");
        assert_eq!(archive_name(&name, ArchiveFormat::Zip), "cutevariant-standalone-x64.zip");
    }

    #[test]
    fn test_artifact_name_defaults_to_all_axes() {
        let assignment = AxisAssignment::new()
            .with("architecture", "x86")
            .with("python_version", "3.8");
        assert_eq!(
            artifact_name(&spec(None), &assignment),
            "cutevariant-standalone-x86-3.8"
        );
    }

    #[test]
    fn test_artifact_name_without_axes() {
        assert_eq!(
            artifact_name(&spec(None), &AxisAssignment::new()),
            "cutevariant-standalone"
        );
    }

    #[test]
    fn test_names_are_stable_across_calls() {
        let assignment = AxisAssignment::new().with("architecture", "x64");
        let first = artifact_name(&spec(None), &assignment);
        let second = artifact_name(&spec(None), &assignment);
        assert_eq!(first, second);
        assert_eq!(
            archive_name(&first, ArchiveFormat::TarZst),
            archive_name(&second, ArchiveFormat::TarZst)
        );
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("win/x64"), "win_x64");
        assert_eq!(sanitize("mac os"), "mac_os");
        assert_eq!(sanitize("a:b*c"), "a_b_c");
    }
}
