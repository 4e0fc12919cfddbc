//! Built-in schemas for `h5p.json` (package) and `library.json` (library) manifests.

use crate::rule::{Schema, SchemaRule};
use std::sync::LazyLock;

const MACHINE_NAME: &str = r"^[A-Za-z0-9_\-.]{1,255}$";
const VERSION_PART: &str = r"^[0-9]{1,5}$";
const TITLE: &str = r"^.{1,255}$";
const NON_EMPTY: &str = r"^.{1,}$";
const DIMENSION: &str = r"^[0-9]{1,4}$";
const ZERO_OR_ONE: &str = r"^(0|1)$";

pub const LICENSES: &[&str] = &[
    "cc-by", "cc-by-sa", "cc-by-nd", "cc-by-nc", "cc-by-nc-sa", "cc-by-nc-nd", "pd", "cr", "MIT",
    "GPL1", "GPL2", "GPL3", "MPL", "MPL2",
];

pub const EMBED_TYPES: &[&str] = &["iframe", "div"];

fn dependency_list() -> SchemaRule {
    SchemaRule::Nested(
        Schema::new()
            .with("machineName", SchemaRule::pattern(MACHINE_NAME))
            .with("majorVersion", SchemaRule::pattern(VERSION_PART))
            .with("minorVersion", SchemaRule::pattern(VERSION_PART)),
    )
}

fn asset_list(extension: &str) -> SchemaRule {
    let path = format!(r"(?i)^((\\|/)?[a-z_\-\s0-9.]+)+\.{extension}$");
    SchemaRule::Nested(Schema::new().with("path", SchemaRule::pattern(&path)))
}

pub static PACKAGE_REQUIRED: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new()
        .with("title", SchemaRule::pattern(TITLE))
        .with("language", SchemaRule::pattern(r"^[a-z]{1,5}$"))
        .with(
            "mainLibrary",
            SchemaRule::pattern(r"(?i)^[$a-z_][0-9a-z_.$]{1,254}$"),
        )
        .with("embedTypes", SchemaRule::options(EMBED_TYPES.iter().copied()))
        .with("preloadedDependencies", dependency_list())
});

pub static PACKAGE_OPTIONAL: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new()
        .with("contentType", SchemaRule::pattern(TITLE))
        .with("author", SchemaRule::pattern(TITLE))
        .with("license", SchemaRule::options(LICENSES.iter().copied()))
        .with("dynamicDependencies", dependency_list())
        .with("w", SchemaRule::pattern(DIMENSION))
        .with("h", SchemaRule::pattern(DIMENSION))
        .with("metaKeywords", SchemaRule::pattern(NON_EMPTY))
        .with("metaDescription", SchemaRule::pattern(NON_EMPTY))
});

pub static LIBRARY_REQUIRED: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new()
        .with("title", SchemaRule::pattern(TITLE))
        .with("majorVersion", SchemaRule::pattern(VERSION_PART))
        .with("minorVersion", SchemaRule::pattern(VERSION_PART))
        .with("patchVersion", SchemaRule::pattern(VERSION_PART))
        .with("machineName", SchemaRule::pattern(MACHINE_NAME))
        .with("runnable", SchemaRule::pattern(ZERO_OR_ONE))
});

pub static LIBRARY_OPTIONAL: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new()
        .with("author", SchemaRule::pattern(TITLE))
        .with("license", SchemaRule::options(LICENSES.iter().copied()))
        .with("description", SchemaRule::pattern(NON_EMPTY))
        .with("dynamicDependencies", dependency_list())
        .with("preloadedDependencies", dependency_list())
        .with("editorDependencies", dependency_list())
        .with("preloadedJs", asset_list("js"))
        .with("preloadedCss", asset_list("css"))
        .with(
            "dropLibraryCss",
            SchemaRule::Nested(Schema::new().with("machineName", SchemaRule::pattern(MACHINE_NAME))),
        )
        .with("w", SchemaRule::pattern(DIMENSION))
        .with("h", SchemaRule::pattern(DIMENSION))
        .with("embedTypes", SchemaRule::options(EMBED_TYPES.iter().copied()))
        .with("fullscreen", SchemaRule::pattern(ZERO_OR_ONE))
        .with(
            "coreApi",
            SchemaRule::Nested(
                Schema::new()
                    .with("majorVersion", SchemaRule::pattern(VERSION_PART))
                    .with("minorVersion", SchemaRule::pattern(VERSION_PART)),
            ),
        )
});
