//! Filesystem layout of a run.
//!
//! Every path is derived once from the start directory, so no step depends
//! on the process working directory.

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use std::path::{Path, PathBuf};

/// Clone destination for the compliance suite.
pub const ARCH_TESTS_DIR: &str = "psa-arch-tests";

/// Clone destination for the test-invocation resources.
pub const MBEDTLS_TEST_DIR: &str = "mbedtls-test";

/// Absolute paths touched by one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessLayout {
    /// Root of the crypto library checkout; the run starts here.
    pub start_dir: PathBuf,

    /// Scratch directory holding clones and build outputs.
    pub work_dir: PathBuf,

    /// `psa-arch-tests/api-tests` inside the scratch directory.
    pub api_tests_dir: PathBuf,

    /// cmake build directory under `api_tests_dir`.
    pub build_dir: PathBuf,

    pub test_main_source: PathBuf,
    pub test_main_object: PathBuf,

    /// PSA headers passed to cmake as `PSA_INCLUDE_PATHS`.
    pub include_dir: PathBuf,

    /// Static crypto library produced by `make`.
    pub crypto_archive: PathBuf,

    /// Linked compliance executable.
    pub test_binary: PathBuf,
}

impl HarnessLayout {
    pub fn new(start_dir: impl Into<PathBuf>, config: &HarnessConfig) -> Self {
        let start_dir = start_dir.into();
        let work_dir = start_dir.join(&config.working_folder);
        let api_tests_dir = work_dir.join(ARCH_TESTS_DIR).join("api-tests");
        let build_dir = api_tests_dir.join(&config.cmake_build_folder);
        let resources = work_dir
            .join(MBEDTLS_TEST_DIR)
            .join("resources")
            .join("psa-arch-tests");

        Self {
            include_dir: start_dir.join("include"),
            crypto_archive: start_dir.join("library").join("libmbedcrypto.a"),
            test_main_source: resources.join("main.c"),
            test_main_object: resources.join("main.o"),
            test_binary: build_dir.join(&config.test_binary_name),
            start_dir,
            work_dir,
            api_tests_dir,
            build_dir,
        }
    }

    /// Tool arguments are passed as UTF-8 strings, so a start directory
    /// that is not valid UTF-8 cannot be forwarded faithfully.
    pub fn check_start_dir(start_dir: &Path) -> HarnessResult<()> {
        match start_dir.to_str() {
            Some(_) => Ok(()),
            None => Err(HarnessError::InvalidConfig(format!(
                "start directory {} is not valid UTF-8",
                start_dir.display()
            ))),
        }
    }

    /// Crypto library root (`make -C` target).
    pub fn crypto_root(&self) -> &Path {
        &self.start_dir
    }

    /// Static archives produced by the cmake build, in link order.
    ///
    /// `test_combine.a` is listed twice because it and `val_nspe.a`
    /// reference each other.
    pub fn suite_archives(&self) -> Vec<PathBuf> {
        let combine = self.build_dir.join("dev_apis").join("crypto").join("test_combine.a");
        vec![
            combine.clone(),
            self.build_dir.join("val").join("val_nspe.a"),
            self.build_dir.join("platform").join("pal_nspe.a"),
            combine,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_rooted_at_start_dir() {
        let layout = HarnessLayout::new("/src/mbed-crypto", &HarnessConfig::default());

        assert_eq!(layout.work_dir, PathBuf::from("/src/mbed-crypto/psa-tests-temp"));
        assert_eq!(
            layout.build_dir,
            PathBuf::from("/src/mbed-crypto/psa-tests-temp/psa-arch-tests/api-tests/cmake_build")
        );
        assert_eq!(layout.include_dir, PathBuf::from("/src/mbed-crypto/include"));
        assert_eq!(
            layout.crypto_archive,
            PathBuf::from("/src/mbed-crypto/library/libmbedcrypto.a")
        );
        assert_eq!(layout.crypto_root(), Path::new("/src/mbed-crypto"));
        assert!(layout.test_binary.ends_with("cmake_build/psa-arch-crypto-tests"));
        assert!(layout
            .test_main_object
            .ends_with("mbedtls-test/resources/psa-arch-tests/main.o"));
    }

    #[test]
    fn test_utf8_start_dir_accepted() {
        assert!(HarnessLayout::check_start_dir(Path::new("/src/mbed-crypto")).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_start_dir_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = Path::new(OsStr::from_bytes(b"/src/mbed-\xffcrypto"));
        let err = HarnessLayout::check_start_dir(dir).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidConfig(_)));
    }

    #[test]
    fn test_suite_archives_link_order() {
        let layout = HarnessLayout::new("/s", &HarnessConfig::default());
        let archives = layout.suite_archives();
        assert_eq!(archives.len(), 4);
        assert!(archives[0].ends_with("dev_apis/crypto/test_combine.a"));
        assert!(archives[1].ends_with("val/val_nspe.a"));
        assert!(archives[2].ends_with("platform/pal_nspe.a"));
        assert_eq!(archives[0], archives[3]);
    }
}
