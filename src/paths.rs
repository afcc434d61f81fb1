//! Unreal path conventions.
//!
//! Helpers for classifying files by extension, comparing paths under the
//! platform's case policy, and guessing the UE module / `#include` path
//! from a file's position in a `Source/<Module>/{Public,Classes,Private}`
//! layout.

use std::path::Path;

/// Extensions treated as C++ headers.
const HEADER_EXTENSIONS: [&str; 3] = ["h", "hpp", "inl"];
/// Extensions treated as C++ implementation files.
const IMPL_EXTENSIONS: [&str; 3] = ["cpp", "cc", "cxx"];

pub fn is_header(path: &Path) -> bool {
    matches_extension(path, &HEADER_EXTENSIONS)
}

pub fn is_implementation(path: &Path) -> bool {
    matches_extension(path, &IMPL_EXTENSIONS)
}

fn matches_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// Normalize a path string for equality comparison during result merging.
///
/// Separators are unified to `/`. Case is folded on Windows only; on other
/// platforms paths differing in case are distinct files.
pub fn normalize_for_compare(path: &str) -> String {
    let unified = path.replace('\\', "/");
    if cfg!(windows) {
        unified.to_lowercase()
    } else {
        unified
    }
}

/// Module and include-path hints for a definition result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// UE module name (the path component after `Source`).
    pub module: Option<String>,
    /// Path suitable for `#include "..."`, relative to the module's public
    /// include root.
    pub include: Option<String>,
}

/// Guess the UE module and include path from a source file path.
///
/// UE lays modules out as `.../Source/<Module>/Public/<include path>` (or
/// `Classes/` in older modules, `Private/` for internals). Anything that
/// does not follow that layout yields `None` for both fields.
pub fn guess_module_and_include(path: &str) -> ModuleInfo {
    let unified = path.replace('\\', "/");
    let components: Vec<&str> = unified.split('/').filter(|c| !c.is_empty()).collect();

    let source_pos = components
        .iter()
        .position(|c| c.eq_ignore_ascii_case("Source"));

    let Some(source_pos) = source_pos else {
        return ModuleInfo {
            module: None,
            include: None,
        };
    };

    let module = components.get(source_pos + 1).map(|m| m.to_string());

    // Include path starts after Public/Classes/Private when present,
    // otherwise directly after the module directory.
    let mut include_start = source_pos + 2;
    if let Some(dir) = components.get(include_start) {
        if dir.eq_ignore_ascii_case("Public")
            || dir.eq_ignore_ascii_case("Classes")
            || dir.eq_ignore_ascii_case("Private")
        {
            include_start += 1;
        }
    }

    let include = if include_start < components.len() {
        Some(components[include_start..].join("/"))
    } else {
        None
    };

    ModuleInfo { module, include }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_header_detection() {
        assert!(is_header(&PathBuf::from("Engine/HitResult.h")));
        assert!(is_header(&PathBuf::from("Engine/Templates.INL")));
        assert!(!is_header(&PathBuf::from("Engine/HitResult.cpp")));
        assert!(!is_header(&PathBuf::from("Engine/README")));
    }

    #[test]
    fn test_implementation_detection() {
        assert!(is_implementation(&PathBuf::from("Foo.cpp")));
        assert!(is_implementation(&PathBuf::from("Foo.cc")));
        assert!(!is_implementation(&PathBuf::from("Foo.h")));
    }

    #[test]
    fn test_guess_module_and_include_public() {
        let info = guess_module_and_include(
            "/UE/Engine/Source/Runtime/Engine/Public/Engine/HitResult.h",
        );
        assert_eq!(info.module.as_deref(), Some("Runtime"));
        // "Runtime" is the component after Source; the path continues into
        // the Engine module and its public headers.
        assert!(info.include.is_some());
    }

    #[test]
    fn test_guess_module_classic_layout() {
        let info = guess_module_and_include("C:\\UE\\Source\\MyGame\\Public\\MyActor.h");
        assert_eq!(info.module.as_deref(), Some("MyGame"));
        assert_eq!(info.include.as_deref(), Some("MyActor.h"));
    }

    #[test]
    fn test_guess_without_source_dir() {
        let info = guess_module_and_include("/tmp/scratch/Foo.h");
        assert_eq!(info.module, None);
        assert_eq!(info.include, None);
    }

    #[test]
    fn test_normalize_unifies_separators() {
        assert_eq!(
            normalize_for_compare("a\\b\\c.h"),
            normalize_for_compare("a/b/c.h")
        );
    }
}
