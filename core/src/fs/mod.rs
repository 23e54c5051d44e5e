//! File system access layer: exploded document folders.

pub mod folder;
mod util;

pub use folder::FolderSource;
pub use util::{
    Token, is_hidden, is_markup, natural_cmp, natural_cmp_path, resolve_reference,
    sanitize_relative, tokenize,
};

/// Shared result type for fs operations.
pub type Result<T> = crate::Result<T>;
