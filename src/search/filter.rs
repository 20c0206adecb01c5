//! Which local paths are worth showing, and what kind of file they are.

use crate::search::scoring::FileCategory;
use std::path::{Component, Path};

/// Directory names whose whole subtree is noise: dependencies, build output,
/// VCS internals, caches.
const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    "bower_components",
    "vendor",
    "target",
    "build",
    "dist",
    "out",
    "__pycache__",
    "venv",
    "site-packages",
    "DerivedData",
    "Pods",
    "CVS",
];

/// Top-level system locations, matched against the first components of an
/// absolute path.
const SYSTEM_PREFIXES: &[&str] = &[
    "/System",
    "/Library",
    "/private",
    "/usr",
    "/bin",
    "/sbin",
    "/etc",
    "/var",
    "/opt",
    "/proc",
    "/sys",
    "/dev",
    "/tmp",
    "/Applications/Utilities",
];

/// Per-user locations that only hold application state.
const HOME_NOISE: &[&str] = &["Library", "AppData", "snap"];

const CONFIG_EXTENSIONS: &[&str] = &[
    "json", "yaml", "yml", "toml", "ini", "cfg", "conf", "plist", "xml", "env", "properties",
    "lock",
];

const TEMP_EXTENSIONS: &[&str] = &["tmp", "temp", "swp", "swo", "bak", "part", "crdownload", "log"];

const APPLICATION_EXTENSIONS: &[&str] = &["app", "exe", "appimage", "desktop"];
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "txt", "md", "markdown", "rtf", "pages", "epub", "tex"];
const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "heic", "webp", "svg", "tiff", "bmp", "mp3", "wav", "flac",
    "m4a", "aac", "ogg", "mp4", "mov", "mkv", "avi", "webm",
];
const OFFICE_EXTENSIONS: &[&str] = &[
    "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "key", "numbers", "csv",
];
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "tar", "gz", "tgz", "bz2", "xz", "rar", "7z", "dmg", "iso"];

fn extension_of(name: &str) -> Option<String> {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => Some(name[idx + 1..].to_ascii_lowercase()),
        _ => None,
    }
}

/// True when anything about the path's location rules it out: system
/// directories, excluded directory names, hidden components, or being inside
/// an application bundle.
pub fn is_excluded_path(path: &Path, root: &Path) -> bool {
    if SYSTEM_PREFIXES.iter().any(|p| path.starts_with(p)) && !path.starts_with(root) {
        return true;
    }
    let relative = path.strip_prefix(root).unwrap_or(path);
    if let Some(Component::Normal(first)) = relative.components().next()
        && HOME_NOISE.iter().any(|n| first == *n)
    {
        return true;
    }

    let names: Vec<&str> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();
    let Some((_, parents)) = names.split_last() else {
        return false;
    };
    parents.iter().any(|dir| {
        dir.starts_with('.')
            || EXCLUDED_DIRS.contains(dir)
            || dir.to_ascii_lowercase().ends_with(".app")
    }) || names.last().is_some_and(|n| n.starts_with('.'))
}

/// Category of a regular file, or `None` when the name is filtered out.
pub fn classify_file(name: &str) -> Option<FileCategory> {
    if name.starts_with('.') || name.starts_with("~$") || name.ends_with('~') {
        return None;
    }
    let Some(ext) = extension_of(name) else {
        return looks_user_authored(name).then_some(FileCategory::Other);
    };
    let ext = ext.as_str();
    if CONFIG_EXTENSIONS.contains(&ext) || TEMP_EXTENSIONS.contains(&ext) {
        return None;
    }
    if APPLICATION_EXTENSIONS.contains(&ext) {
        Some(FileCategory::Application)
    } else if DOCUMENT_EXTENSIONS.contains(&ext) {
        Some(FileCategory::Document)
    } else if MEDIA_EXTENSIONS.contains(&ext) {
        Some(FileCategory::Media)
    } else if OFFICE_EXTENSIONS.contains(&ext) {
        Some(FileCategory::Office)
    } else if ARCHIVE_EXTENSIONS.contains(&ext) {
        Some(FileCategory::Archive)
    } else {
        None
    }
}

/// Category of a directory. Bundles such as `Foo.app` are directories on
/// macOS but count as applications.
pub fn classify_dir(name: &str) -> Option<FileCategory> {
    if name.starts_with('.') || EXCLUDED_DIRS.contains(&name) {
        return None;
    }
    match extension_of(name).as_deref() {
        Some("app") => Some(FileCategory::Application),
        _ => Some(FileCategory::Folder),
    }
}

/// Extensionless names like `README` or `Tax Notes` are kept; lowercase
/// tool-style names like `makefile` or `id_rsa` are not.
fn looks_user_authored(name: &str) -> bool {
    let starts_upper = name.chars().next().is_some_and(char::is_uppercase);
    let readable = name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'));
    readable && (starts_upper || name.contains(' '))
}

/// Category for a Drive MIME type.
pub fn categorize_mime(mime_type: Option<&str>) -> FileCategory {
    let Some(mime) = mime_type else {
        return FileCategory::Other;
    };
    match mime {
        crate::types::drive::FOLDER_MIME_TYPE => FileCategory::Folder,
        "application/pdf" | "text/plain" | "text/markdown" | "application/vnd.google-apps.document" => {
            FileCategory::Document
        }
        m if m.starts_with("image/") || m.starts_with("video/") || m.starts_with("audio/") => {
            FileCategory::Media
        }
        m if m.contains("spreadsheet")
            || m.contains("presentation")
            || m.contains("msword")
            || m.contains("officedocument")
            || m.contains("ms-excel")
            || m.contains("ms-powerpoint") =>
        {
            FileCategory::Office
        }
        "application/zip" | "application/x-tar" | "application/gzip" | "application/x-7z-compressed" => {
            FileCategory::Archive
        }
        _ => FileCategory::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn excluded(path: &str) -> bool {
        is_excluded_path(Path::new(path), Path::new("/Users/a"))
    }

    #[test]
    fn dependency_and_vcs_dirs_are_excluded() {
        assert!(excluded("/Users/a/node_modules/report.json"));
        assert!(excluded("/Users/a/code/app/target/debug/report"));
        assert!(excluded("/Users/a/code/.git/HEAD"));
        assert!(!excluded("/Users/a/report.pdf"));
        assert!(!excluded("/Users/a/Documents/Work/report.pdf"));
    }

    #[test]
    fn hidden_system_and_bundle_paths_are_excluded() {
        assert!(excluded("/Users/a/.config/report.txt"));
        assert!(excluded("/Users/a/.report.txt"));
        assert!(excluded("/Users/a/Library/Caches/report.pdf"));
        assert!(excluded("/System/Library/report.pdf"));
        assert!(excluded("/Applications/Reporter.app/Contents/Info.plist"));
    }

    #[test]
    fn file_classification() {
        assert_eq!(classify_file("report.pdf"), Some(FileCategory::Document));
        assert_eq!(classify_file("Budget.xlsx"), Some(FileCategory::Office));
        assert_eq!(classify_file("photo.HEIC"), Some(FileCategory::Media));
        assert_eq!(classify_file("backup.zip"), Some(FileCategory::Archive));
        assert_eq!(classify_file("README"), Some(FileCategory::Other));
        assert_eq!(classify_file("report.json"), None);
        assert_eq!(classify_file("report.log"), None);
        assert_eq!(classify_file("~$report.docx"), None);
        assert_eq!(classify_file("main.rs"), None);
        assert_eq!(classify_file("id_rsa"), None);
    }

    #[test]
    fn directory_classification() {
        assert_eq!(classify_dir("Reporter.app"), Some(FileCategory::Application));
        assert_eq!(classify_dir("Reports"), Some(FileCategory::Folder));
        assert_eq!(classify_dir("node_modules"), None);
    }

    #[test]
    fn mime_categories() {
        assert_eq!(
            categorize_mime(Some("application/vnd.google-apps.folder")),
            FileCategory::Folder
        );
        assert_eq!(
            categorize_mime(Some("application/vnd.google-apps.spreadsheet")),
            FileCategory::Office
        );
        assert_eq!(categorize_mime(Some("image/png")), FileCategory::Media);
        assert_eq!(categorize_mime(None), FileCategory::Other);
    }
}
