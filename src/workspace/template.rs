//! Template trees copied into new workspaces with `{{var}}` substitution.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use super::types::{METADATA_FILE, STATE_DIR};
use crate::error::{Error, IoContext, Result};

/// Replace every `{{key}}` with its value. Unknown placeholders stay as-is.
pub fn substitute(input: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = input.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

pub(crate) fn validate_template(template: &Path) -> Result<()> {
    if !template.is_dir() {
        return Err(Error::Validation(format!(
            "template is not a directory: {}",
            template.display()
        )));
    }
    Ok(())
}

/// Copy `template` into `dest`, substituting variables in UTF-8 file
/// contents and in every relative path segment. Entries that would shadow
/// the workspace metadata or state directory are skipped.
///
/// Every target path is checked before anything is written; a substituted
/// segment that is empty, `.`, `..` or contains a separator is rejected.
pub(crate) fn copy_template(
    template: &Path,
    dest: &Path,
    vars: &BTreeMap<String, String>,
) -> Result<()> {
    let mut plan = Vec::new();
    for entry in WalkDir::new(template).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let context = format!("walking template {}", template.display());
            match e.into_io_error() {
                Some(io) => Error::io(context, io),
                None => Error::Validation(format!("{context}: filesystem loop")),
            }
        })?;
        let rel = entry
            .path()
            .strip_prefix(template)
            .map_err(|_| Error::Validation("template entry outside template root".to_string()))?;
        let target = dest.join(substitute_path(rel, vars)?);
        plan.push((entry, target));
    }

    for (entry, target) in plan {
        let rel = entry.path().strip_prefix(template).unwrap_or(entry.path());
        if is_reserved(&target, dest) {
            log::warn!("skipping reserved template entry {}", rel.display());
            continue;
        }

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .io_context(|| format!("creating {}", target.display()))?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .io_context(|| format!("creating {}", parent.display()))?;
            }
            let bytes = fs::read(entry.path())
                .io_context(|| format!("reading {}", entry.path().display()))?;
            let contents = match String::from_utf8(bytes) {
                Ok(text) => substitute(&text, vars).into_bytes(),
                Err(binary) => binary.into_bytes(),
            };
            fs::write(&target, contents).io_context(|| format!("writing {}", target.display()))?;
        } else {
            log::debug!("skipping non-regular template entry {}", rel.display());
        }
    }
    Ok(())
}

fn substitute_path(rel: &Path, vars: &BTreeMap<String, String>) -> Result<PathBuf> {
    rel.components()
        .map(|c| {
            let raw = c.as_os_str().to_string_lossy();
            let segment = substitute(&raw, vars);
            if is_plain_segment(&segment) {
                Ok(segment)
            } else {
                Err(Error::Validation(format!(
                    "template path '{}' expands to invalid segment '{segment}'",
                    rel.display()
                )))
            }
        })
        .collect()
}

/// A single normal path component: not empty, not `.`/`..`, no separator.
fn is_plain_segment(segment: &str) -> bool {
    if segment.is_empty() || segment.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn is_reserved(target: &Path, dest: &Path) -> bool {
    target
        .strip_prefix(dest)
        .ok()
        .and_then(|rel| rel.components().next())
        .map(|first| {
            let first = first.as_os_str();
            first == METADATA_FILE || first == STATE_DIR
        })
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("project".to_string(), "billing".to_string()),
            ("owner".to_string(), "ana".to_string()),
        ])
    }

    #[test]
    fn substitute_known_and_unknown() {
        assert_eq!(
            substitute("{{project}} by {{owner}} ({{missing}})", &vars()),
            "billing by ana ({{missing}})"
        );
    }

    #[test]
    fn copies_with_content_and_path_substitution() {
        let template = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::create_dir_all(template.path().join("{{project}}-docs")).unwrap();
        fs::write(
            template.path().join("{{project}}-docs/README-{{owner}}.md"),
            "# {{project}}\n",
        )
        .unwrap();
        fs::write(template.path().join("blob.bin"), [0xff, 0xfe, 0x00]).unwrap();

        copy_template(template.path(), dest.path(), &vars()).unwrap();

        let readme = dest.path().join("billing-docs/README-ana.md");
        assert_eq!(fs::read_to_string(readme).unwrap(), "# billing\n");
        assert_eq!(
            fs::read(dest.path().join("blob.bin")).unwrap(),
            vec![0xff, 0xfe, 0x00]
        );
    }

    #[test]
    fn reserved_entries_are_skipped() {
        let template = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::write(template.path().join(METADATA_FILE), "{}").unwrap();
        fs::write(template.path().join("keep.txt"), "x").unwrap();

        copy_template(template.path(), dest.path(), &BTreeMap::new()).unwrap();
        assert!(!dest.path().join(METADATA_FILE).exists());
        assert!(dest.path().join("keep.txt").exists());
    }

    #[test]
    fn escaping_values_are_rejected_before_writing() {
        let root = tempfile::tempdir().unwrap();
        let template = root.path().join("template");
        let dest = root.path().join("a/b/dest");
        fs::create_dir_all(&template).unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(template.join("aaa.txt"), "first").unwrap();
        fs::write(template.join("{{name}}"), "x").unwrap();

        for value in ["../../escaped", "..", ".", "", "nested/dir", "/abs"] {
            let vars = BTreeMap::from([("name".to_string(), value.to_string())]);
            let err = copy_template(&template, &dest, &vars).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "value {value:?}");
        }
        assert!(!root.path().join("a/escaped").exists());
        assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[test]
    fn missing_template_fails_validation() {
        let err = validate_template(Path::new("/no/such/template")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
