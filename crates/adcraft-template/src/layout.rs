use crate::document::{check_document, MANIFEST_SCRIPT_FILE};
use crate::TemplateError;
use adcraft_schema::{parse_manifest_str, Manifest, ManifestError, Size, TemplateId};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub const INDEX_FILE: &str = "index.html";
pub const MANIFEST_FILE: &str = MANIFEST_SCRIPT_FILE;

/// Directory layout of the template library.
///
/// Each template is a folder of size folders named `WxH`; folders whose name
/// does not parse as a size are ignored.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    root: PathBuf,
}

impl TemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn template_dir(&self, id: &TemplateId) -> Result<PathBuf, TemplateError> {
        if !id.is_path_safe() {
            return Err(TemplateError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(id.as_str()))
    }

    pub fn size_dir(&self, id: &TemplateId, size: Size) -> Result<PathBuf, TemplateError> {
        Ok(self.template_dir(id)?.join(size.label()))
    }

    /// All template folders, sorted by name.
    pub fn list_templates(&self) -> Result<Vec<TemplateId>, TemplateError> {
        let mut ids = Vec::new();
        if !self.root.is_dir() {
            return Ok(ids);
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    ids.push(TemplateId::new(name));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Size folders of a template, sorted by width then height.
    pub fn size_folders(&self, id: &TemplateId) -> Result<Vec<Size>, TemplateError> {
        let dir = self.template_dir(id)?;
        if !dir.is_dir() {
            return Err(TemplateError::TemplateNotFound(id.to_string()));
        }
        let mut sizes = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().map(str::parse::<Size>) {
                Some(Ok(size)) => sizes.push(size),
                _ => debug!("ignoring non-size folder {:?} in template '{id}'", name),
            }
        }
        sizes.sort();
        Ok(sizes)
    }

    /// Load and validate one size variant of a template.
    pub fn open(&self, id: &TemplateId, size: Size) -> Result<TemplateSize, TemplateError> {
        let template_dir = self.template_dir(id)?;
        if !template_dir.is_dir() {
            return Err(TemplateError::TemplateNotFound(id.to_string()));
        }
        let dir = template_dir.join(size.label());
        let index_path = dir.join(INDEX_FILE);
        let manifest_path = dir.join(MANIFEST_FILE);
        if !index_path.is_file() || !manifest_path.is_file() {
            return Err(TemplateError::SizeNotFound {
                template: id.to_string(),
                size: size.label(),
            });
        }

        let index_html = fs::read_to_string(&index_path)?;
        check_document(&index_html, &index_path.display().to_string())?;
        let manifest_source = fs::read_to_string(&manifest_path)?;
        let manifest =
            parse_manifest_str(&manifest_source).map_err(|e| TemplateError::Manifest {
                path: manifest_path.display().to_string(),
                source: ManifestError::Parse(e),
            })?;

        debug!("opened template '{id}' at {size}");
        Ok(TemplateSize {
            template: id.clone(),
            size,
            dir,
            index_html,
            manifest_source,
            manifest,
        })
    }

    /// Resolve a file inside a size folder, rejecting anything that would
    /// leave it.
    pub fn asset_path(
        &self,
        id: &TemplateId,
        size: Size,
        relative: &str,
    ) -> Result<PathBuf, TemplateError> {
        let rel = safe_relative(relative)?;
        Ok(self.size_dir(id, size)?.join(rel))
    }
}

fn safe_relative(relative: &str) -> Result<PathBuf, TemplateError> {
    let path = Path::new(relative);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(TemplateError::InvalidPath(relative.to_owned())),
        }
    }
    if out.as_os_str().is_empty() {
        return Err(TemplateError::InvalidPath(relative.to_owned()));
    }
    Ok(out)
}

/// One loaded size variant: the raw documents and the parsed manifest.
#[derive(Debug, Clone)]
pub struct TemplateSize {
    pub template: TemplateId,
    pub size: Size,
    pub dir: PathBuf,
    pub index_html: String,
    pub manifest_source: String,
    pub manifest: Manifest,
}

impl TemplateSize {
    /// Every regular file in the size folder except the two documents that
    /// get rewritten, as sorted relative paths.
    pub fn asset_files(&self) -> Result<Vec<PathBuf>, TemplateError> {
        let mut files = Vec::new();
        collect_files(&self.dir, Path::new(""), &mut files)?;
        files.retain(|p| p != Path::new(INDEX_FILE) && p != Path::new(MANIFEST_FILE));
        files.sort();
        Ok(files)
    }
}

fn collect_files(base: &Path, rel: &Path, out: &mut Vec<PathBuf>) -> Result<(), TemplateError> {
    for entry in fs::read_dir(base.join(rel))? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let child = rel.join(entry.file_name());
        if file_type.is_dir() {
            collect_files(base, &child, out)?;
        } else if file_type.is_file() {
            out.push(child);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"<html><head><script src="runtime.js"></script><script src="manifest.js"></script></head>
<body><script>var dynamicData = {}; Creative.dynamicData = dynamicData;</script></body></html>"#;

    fn write_size(root: &Path, template: &str, size: &str, manifest: &str) {
        let dir = root.join(template).join(size);
        fs::create_dir_all(dir.join("img")).unwrap();
        fs::write(dir.join(INDEX_FILE), INDEX).unwrap();
        fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        fs::write(dir.join("runtime.js"), "/* runtime */").unwrap();
        fs::write(dir.join("img").join("bg.png"), b"png").unwrap();
    }

    #[test]
    fn lists_templates_and_sorted_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let m = "var manifest = {layers: []};";
        write_size(dir.path(), "spring", "728x90", m);
        write_size(dir.path(), "spring", "300x250", m);
        write_size(dir.path(), "autumn", "160x600", m);
        fs::create_dir_all(dir.path().join("spring").join("drafts")).unwrap();

        let store = TemplateStore::new(dir.path());
        let ids: Vec<String> = store
            .list_templates()
            .unwrap()
            .into_iter()
            .map(TemplateId::into_inner)
            .collect();
        assert_eq!(ids, vec!["autumn", "spring"]);
        let sizes = store.size_folders(&TemplateId::new("spring")).unwrap();
        assert_eq!(sizes, vec![Size::new(300, 250), Size::new(728, 90)]);
    }

    #[test]
    fn open_loads_and_parses() {
        let dir = tempfile::tempdir().unwrap();
        write_size(dir.path(), "t", "300x250", "var manifest = {layers: [], sizes: [{width: 300, height: 250}]};");
        let store = TemplateStore::new(dir.path());
        let size = store.open(&TemplateId::new("t"), Size::new(300, 250)).unwrap();
        assert!(size.manifest.root().contains_key("sizes"));
        let files = size.asset_files().unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from("img").join("bg.png"), PathBuf::from("runtime.js")]
        );
    }

    #[test]
    fn missing_template_and_size_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        write_size(dir.path(), "t", "300x250", "var manifest = {};");
        let store = TemplateStore::new(dir.path());
        let err = store.open(&TemplateId::new("nope"), Size::new(300, 250)).unwrap_err();
        assert!(matches!(err, TemplateError::TemplateNotFound(_)));
        let err = store.open(&TemplateId::new("t"), Size::new(1, 1)).unwrap_err();
        assert!(matches!(err, TemplateError::SizeNotFound { .. }));
        assert!(store.size_folders(&TemplateId::new("nope")).unwrap_err().is_not_found());
    }

    #[test]
    fn malformed_manifest_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        write_size(dir.path(), "t", "300x250", "var manifest = {layers: [");
        let store = TemplateStore::new(dir.path());
        let err = store.open(&TemplateId::new("t"), Size::new(300, 250)).unwrap_err();
        assert!(err.is_malformed());
        assert!(err.to_string().contains(MANIFEST_FILE));
    }

    #[test]
    fn rejects_unsafe_ids_and_paths() {
        let store = TemplateStore::new("/srv/templates");
        assert!(matches!(
            store.template_dir(&TemplateId::new("..")),
            Err(TemplateError::InvalidId(_))
        ));
        let id = TemplateId::new("t");
        let size = Size::new(300, 250);
        assert!(store.asset_path(&id, size, "../../etc/passwd").is_err());
        assert!(store.asset_path(&id, size, "/etc/passwd").is_err());
        assert_eq!(
            store.asset_path(&id, size, "./img/bg.png").unwrap(),
            PathBuf::from("/srv/templates/t/300x250/img/bg.png")
        );
    }
}
