//! Build metadata baked in at compile time by `build.rs`, read back via
//! `option_env!` since no runtime clock is available this deep in the
//! stack.

use alloc::format;
use alloc::string::{String, ToString};
use core::cmp::min;

pub fn get_build_info() -> String {
    let commit = option_env!("GIT_COMMIT").unwrap_or("unknown");
    let branch = option_env!("GIT_BRANCH").unwrap_or("unknown");
    let dirty = option_env!("GIT_DIRTY")
        .map(|s| s == "1")
        .unwrap_or(false);
    let ts = option_env!("BUILD_TIMESTAMP").unwrap_or("0");
    let rustv = option_env!("RUST_VERSION").unwrap_or("unknown");
    let feats = option_env!("FEATURES").unwrap_or("");
    let profile = option_env!("PROFILE").unwrap_or("unknown");
    let target = option_env!("TARGET").unwrap_or("unknown");

    let dirty_marker = if dirty { " (dirty)" } else { "" };
    format!(
        "forgecore build information\n\
         Git:       {} @ {}{}\n\
         Built:     {}\n\
         Rust:      {}\n\
         Features:  {}\n\
         Profile:   {}\n\
         Target:    {}",
        &commit[..min(12, commit.len())],
        branch,
        dirty_marker,
        ts,
        rustv,
        if feats.is_empty() {
            "(none)".to_string()
        } else {
            feats.to_string()
        },
        profile,
        target
    )
}

pub fn get_version_string() -> String {
    let commit = option_env!("GIT_COMMIT").unwrap_or("unknown");
    let branch = option_env!("GIT_BRANCH").unwrap_or("unknown");
    let dirty = option_env!("GIT_DIRTY")
        .map(|s| s == "1")
        .unwrap_or(false);
    let ts = option_env!("BUILD_TIMESTAMP").unwrap_or("0");
    let dirty_marker = if dirty { "+" } else { "" };
    let date = if ts.len() >= 10 { &ts[..10] } else { ts };
    format!(
        "forgecore {} ({}{}) built {}",
        &commit[..min(7, commit.len())],
        branch,
        dirty_marker,
        date
    )
}

pub fn get_build_info_json() -> String {
    let commit = option_env!("GIT_COMMIT").unwrap_or("unknown");
    let branch = option_env!("GIT_BRANCH").unwrap_or("unknown");
    let dirty = option_env!("GIT_DIRTY")
        .map(|s| s == "1")
        .unwrap_or(false);
    let ts = option_env!("BUILD_TIMESTAMP").unwrap_or("0");
    let target = option_env!("TARGET").unwrap_or("unknown");
    format!(
        "{{\"commit\":\"{}\",\"branch\":\"{}\",\"dirty\":{},\"ts\":{},\"target\":\"{}\"}}",
        commit, branch, dirty, ts, target
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_is_non_empty() {
        assert!(!get_version_string().is_empty());
    }

    #[test]
    fn json_is_well_formed_braces() {
        let j = get_build_info_json();
        assert!(j.starts_with('{') && j.ends_with('}'));
    }
}
