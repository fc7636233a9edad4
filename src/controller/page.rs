//! Page metadata handed to every view.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::UNIX_EPOCH;

use indexmap::IndexMap;
use lazy_static::lazy_static;
use serde::Serialize;

lazy_static! {
    /// Cache-busting tags keyed by resolved asset path, kept for the life of
    /// the process. Asset sets are fixed per deployment.
    static ref ASSET_TAG_CACHE: RwLock<HashMap<PathBuf, String>> = RwLock::new(HashMap::new());
}

/// Title, meta entries and header tags for the current page.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Page {
    pub title: Option<String>,
    pub metas: Vec<String>,
    pub headers: Vec<String>,
    pub version: Option<String>,
    /// Tags this page has computed, by filename as given.
    pub asset_tags: IndexMap<String, String>,
    #[serde(skip)]
    asset_dir: PathBuf,
}

impl Page {
    pub fn new(version: Option<String>, asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            version,
            asset_dir: asset_dir.into(),
            ..Self::default()
        }
    }

    /// Append a `<script>` tag for `filename`.
    pub fn add_js(&mut self, filename: &str) -> io::Result<()> {
        let tag = self.compute_asset_tag(filename)?;
        self.headers.push(format!(
            r#"<script type="text/javascript" src="{}?v={}"></script>"#,
            filename, tag
        ));
        Ok(())
    }

    /// Append a stylesheet `<link>` tag for `filename`.
    pub fn add_css(&mut self, filename: &str, media: Option<&str>) -> io::Result<()> {
        let tag = self.compute_asset_tag(filename)?;
        self.headers.push(format!(
            r#"<link type="text/css" href="{}?v={}" media="{}" rel="stylesheet" />"#,
            filename,
            tag,
            media.unwrap_or("screen")
        ));
        Ok(())
    }

    /// Modification time of an asset in whole seconds, memoized.
    fn compute_asset_tag(&mut self, filename: &str) -> io::Result<String> {
        let path = self.asset_dir.join(filename.trim_start_matches('/'));
        if let Some(tag) = read_cache(&path) {
            self.asset_tags.insert(filename.to_string(), tag.clone());
            return Ok(tag);
        }

        let modified = fs::metadata(&path)?.modified()?;
        let secs = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64().round() as u64)
            .unwrap_or(0);
        let tag = secs.to_string();

        if let Ok(mut cache) = ASSET_TAG_CACHE.write() {
            cache.insert(path, tag.clone());
        }
        self.asset_tags.insert(filename.to_string(), tag.clone());
        Ok(tag)
    }
}

fn read_cache(path: &Path) -> Option<String> {
    ASSET_TAG_CACHE.read().ok()?.get(path).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn touch(path: &Path, secs: u64) {
        fs::write(path, "/* asset */").unwrap();
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn test_add_js_and_css() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("js")).unwrap();
        touch(&dir.path().join("js/app.js"), 1_700_000_000);
        touch(&dir.path().join("site.css"), 1_700_000_100);

        let mut page = Page::new(Some("3".to_string()), dir.path());
        page.add_js("/js/app.js").unwrap();
        page.add_css("/site.css", None).unwrap();

        assert_eq!(
            page.headers,
            vec![
                r#"<script type="text/javascript" src="/js/app.js?v=1700000000"></script>"#.to_string(),
                r#"<link type="text/css" href="/site.css?v=1700000100" media="screen" rel="stylesheet" />"#.to_string(),
            ]
        );
        assert_eq!(page.asset_tags["/js/app.js"], "1700000000");
        assert_eq!(page.asset_tags["/site.css"], "1700000100");
    }

    #[test]
    fn test_new_page_serializes_empty_asset_tags() {
        let page = Page::new(Some("2".to_string()), "/nowhere");
        let value = serde_json::to_value(&page).unwrap();
        assert_eq!(value["asset_tags"], serde_json::json!({}));
        assert_eq!(value["version"], serde_json::json!("2"));
        assert!(value.get("asset_dir").is_none());
    }

    #[test]
    fn test_asset_tag_is_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cached.js");
        touch(&path, 1_600_000_000);

        let mut page = Page::new(None, dir.path());
        page.add_js("cached.js").unwrap();

        // A later change on disk does not alter the tag.
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now())
            .unwrap();
        page.add_js("cached.js").unwrap();
        assert_eq!(page.headers[0], page.headers[1]);
    }

    #[test]
    fn test_missing_asset_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut page = Page::new(None, dir.path());
        assert!(page.add_css("missing.css", Some("print")).is_err());
        assert!(page.headers.is_empty());
        assert!(page.asset_tags.is_empty());
    }
}
