/// Git information captured at build time. Missing values mean the crate was
/// built outside of a git checkout.
pub(crate) struct BuildInfo {
    pub commit_sha1: Option<&'static str>,
    /// `"true"` when the working tree had uncommitted changes.
    pub git_dirty: Option<&'static str>,
}

impl BuildInfo {
    pub fn is_dirty(&self) -> bool {
        self.git_dirty == Some("true")
    }
}

pub(crate) const BUILD_INFO: BuildInfo = BuildInfo {
    commit_sha1: option_env!("VERGEN_GIT_SHA"),
    git_dirty: option_env!("VERGEN_GIT_DIRTY"),
};
