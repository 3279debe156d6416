//! Temporary journal directories for tests.
//!
//! Features:
//! - Per-test directory under the system temp dir, named using the test name.
//! - Automatic cleanup on success.
//! - Keep directories on failure or when `TEST_KEEP_DIR` is set.

use std::{
    future::Future,
    path::{Path, PathBuf},
    pin::Pin,
};

use anyhow::Result;
use uuid::Uuid;

/// Create a fresh temporary directory, run `f` with its path, then clean up.
///
/// - Directory name is derived from `test_name` + a random suffix.
/// - On success and if `TEST_KEEP_DIR` is **not** set, the directory is removed.
/// - On error or if `TEST_KEEP_DIR` **is** set, the directory is kept (and a
///   message is printed).
///
/// If the test panics inside `f`, cleanup is **not** run (the directory is
/// kept), which is usually what you want for debugging.
pub async fn with_temp_dir<F, T>(test_name: &str, f: F) -> Result<T>
where
    F: for<'a> FnOnce(&'a Path) -> Pin<Box<dyn Future<Output = Result<T>> + 'a>>,
{
    let dir = make_dir_path(test_name);
    std::fs::create_dir_all(&dir)?;

    let result = f(&dir).await;

    let keep = std::env::var("TEST_KEEP_DIR").is_ok();

    if result.is_ok() && !keep {
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            eprintln!(
                "[with_temp_dir] Failed to remove '{}': {}",
                dir.display(),
                e
            );
        }
    } else {
        eprintln!(
            "[with_temp_dir] Keeping '{}' (error or TEST_KEEP_DIR set)",
            dir.display()
        );
    }

    result
}

/// Build a unique directory path from a test name.
///
/// - lowercases
/// - replaces non-ascii-alphanumeric with '_'
/// - truncates long names so paths stay readable
fn make_dir_path(test_name: &str) -> PathBuf {
    let mut safe: String = test_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    if safe.trim_matches('_').is_empty() {
        safe = "test".to_string();
    }
    safe.truncate(48);

    let suffix = Uuid::new_v4().simple();
    std::env::temp_dir().join(format!("flowstore_{safe}_{suffix}"))
}

/// Macro to define an async test with its own journal directory.
///
/// Usage:
///
/// ```ignore
/// use test_utils::store_test;
///
/// store_test!(replays_after_restart, |dir| {
///     // `dir` is &Path
///     let journal = FileJournal::open(dir).await?;
///     Ok(())
/// });
/// ```
///
/// This expands to:
/// - `#[tokio::test(flavor = "multi_thread")]`
/// - a call to `with_temp_dir(stringify!(test_name), |dir| async move { ... })`
#[macro_export]
macro_rules! store_test {
    ($name:ident, |$dir:ident| $body:block) => {
        #[tokio::test(flavor = "multi_thread")]
        async fn $name() -> anyhow::Result<()> {
            use $crate::dir::with_temp_dir;

            let test_name = stringify!($name);

            with_temp_dir(test_name, |$dir| {
                let fut = async move { $body };
                Box::pin(fut)
            })
            .await
        }
    };
}
