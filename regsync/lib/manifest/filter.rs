use oci_spec::image::Platform;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The os/arch filter narrowing multi-platform images.
///
/// Each element matches a platform field either exactly or as
/// `first:second` (os `linux:10.0.14393` against os/os-version, arch
/// `arm:v7` against architecture/variant). An empty list matches
/// everything; a descriptor whose field is empty is never filtered out.
#[derive(Debug, Clone, Default)]
pub struct PlatformFilter {
    /// Permitted operating systems, format `os[:version]`.
    pub os_list: Vec<String>,

    /// Permitted architectures, format `architecture[:variant]`.
    pub arch_list: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PlatformFilter {
    /// Creates a filter from os and arch lists, dropping empty entries.
    pub fn new(os_list: Vec<String>, arch_list: Vec<String>) -> Self {
        Self {
            os_list: os_list.into_iter().filter(|s| !s.is_empty()).collect(),
            arch_list: arch_list.into_iter().filter(|s| !s.is_empty()).collect(),
        }
    }

    /// Returns true when nothing is filtered.
    pub fn is_empty(&self) -> bool {
        self.os_list.is_empty() && self.arch_list.is_empty()
    }

    /// Matches the four platform fields of a list descriptor.
    pub fn matches(&self, os: &str, os_version: &str, arch: &str, variant: &str) -> bool {
        list_matches(&self.os_list, os, os_version) && list_matches(&self.arch_list, arch, variant)
    }

    /// Matches a descriptor's platform; descriptors without a platform are
    /// kept.
    pub fn matches_platform(&self, platform: Option<&Platform>) -> bool {
        let Some(platform) = platform else {
            return true;
        };

        self.matches(
            &platform.os().to_string(),
            platform.os_version().as_deref().unwrap_or_default(),
            &platform.architecture().to_string(),
            platform.variant().as_deref().unwrap_or_default(),
        )
    }

    /// Matches against the architecture alone (Docker v2 schema 1 carries
    /// no os field).
    pub fn matches_arch_only(&self, arch: &str) -> bool {
        list_matches(&self.arch_list, arch, "")
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns true when `first`/`second` passes the filter list: the list is
/// empty, `first` is empty, or some element equals `first` or
/// `first:second`.
fn list_matches(filters: &[String], first: &str, second: &str) -> bool {
    if filters.is_empty() || first.is_empty() {
        return true;
    }

    filters
        .iter()
        .any(|filter| colon_match(filter, first, second))
}

/// Compares `first[:second]` to a filter element; `second` is optional.
fn colon_match(filter: &str, first: &str, second: &str) -> bool {
    if !filter.starts_with(first) {
        return false;
    }

    filter.len() == first.len()
        || (filter.as_bytes().get(first.len()) == Some(&b':')
            && &filter[first.len() + 1..] == second)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
