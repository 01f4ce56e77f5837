//! Content heuristics for shell-like tools.
//!
//! A command string is split into segments on `&&`, `||`, `;`, `|` and
//! newlines. Each segment gets one category and the command as a whole takes
//! the riskiest segment. Gate signals are detected independently so that
//! `cargo build && cargo test` reports both compile and test evidence.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{GateName, ToolCategory};

static SEGMENT_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&&|\|\||[;|\n]").unwrap());

static MUTATING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(rm|rmdir|mv|cp|mkdir|touch|chmod|chown|ln|truncate|dd|patch|install|tee)\b",
        r"|\bsed\s+(-[a-zA-Z]*i|--in-place)",
        r"|\bperl\s+-[a-zA-Z]*i",
        r"|\b(npm|yarn|pnpm)\s+(install|add|remove|uninstall)\b",
        r"|\bcargo\s+(add|remove|fmt|fix)\b",
        r"|\bpip3?\s+(install|uninstall)\b",
        r"|\bfind\b.*\s-(delete|exec\s+rm)\b",
        r"|^sort\b.*\s(-[a-zA-Z]*o|--output\b)",
    ))
    .unwrap()
});

static REDIRECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^0-9&<>])>>?\s*([^\s&|;>]+)").unwrap());

static VCS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^git\s+(commit|merge|push|rebase|tag|reset|checkout|switch|cherry-pick|revert|stash|add|rm|mv|pull)\b|^gh\s+pr\s+(merge|create)\b",
    )
    .unwrap()
});

static INTEGRATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^git\s+(merge|push)\b|^gh\s+pr\s+merge\b").unwrap());

static TEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\bcargo\s+(test|nextest)\b|\bpytest\b|\bpython3?\s+-m\s+(pytest|unittest)\b",
        r"|\b(npm|pnpm|yarn)\s+(run\s+)?test\b|\bgo\s+test\b|\b(jest|vitest|tox)\b",
        r"|\bmvn\s+test\b|\bgradle\w*\s+test\b|\b(make|just)\s+test\b",
    ))
    .unwrap()
});

static BUILD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\bcargo\s+(build|check|clippy)\b|^make\b|\bgo\s+(build|vet)\b",
        r"|\b(npm|pnpm|yarn)\s+run\s+build\b|\btsc\b|\bmvn\s+(compile|package)\b",
        r"|\bgradle\w*\s+build\b|\bjust\s+build\b|\bcmake\b",
    ))
    .unwrap()
});

static BENCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bcargo\s+bench\b|\bhyperfine\b|\bpytest\b.*--benchmark|\bgo\s+test\b.*-bench")
        .unwrap()
});

const READ_ONLY_PROGRAMS: &[&str] = &[
    "ls", "cat", "head", "tail", "grep", "rg", "find", "fd", "wc", "pwd", "echo", "printf",
    "which", "tree", "stat", "file", "less", "more", "diff", "du", "df", "printenv",
    "sort", "uniq", "jq", "cut", "date", "whoami", "uname", "true", "test", "basename",
    "dirname", "realpath",
];

const READ_ONLY_GIT: &[&str] = &[
    "status", "log", "diff", "show", "blame", "rev-parse", "ls-files", "describe", "shortlog",
];

/// Programs that run the rest of the segment as another command.
const WRAPPERS: &[&str] = &["sudo", "time", "nice", "command", "exec", "env", "xargs"];

/// `git branch` flags that only list.
const GIT_BRANCH_LISTING: &[&str] = &[
    "-a", "--all", "-r", "--remotes", "-v", "-vv", "--verbose", "-l", "--list",
    "--show-current", "--merged", "--no-merged", "--contains", "--no-contains",
    "--points-at", "--color", "--no-color", "--column", "--no-column",
];

/// Listing flags after which a bare argument is a pattern, not a new branch.
const GIT_BRANCH_PATTERN_FLAGS: &[&str] = &[
    "-l", "--list", "--merged", "--no-merged", "--contains", "--no-contains", "--points-at",
];

/// `git remote` subcommands that only read.
const GIT_REMOTE_READS: &[&str] = &["show", "get-url"];

/// Classify a whole command string; the riskiest segment wins.
pub fn classify_command(command: &str) -> ToolCategory {
    segments(command)
        .map(classify_segment)
        .max_by_key(|category| risk(*category))
        .unwrap_or(ToolCategory::Execute)
}

/// Gates whose evidence a successful run of `command` would provide.
pub fn gate_signals(command: &str) -> BTreeSet<GateName> {
    let mut signals = BTreeSet::new();
    for segment in segments(command) {
        if TEST_RE.is_match(segment) {
            signals.insert(GateName::Test);
        }
        if BUILD_RE.is_match(segment) {
            signals.insert(GateName::Compile);
        }
        if INTEGRATION_RE.is_match(segment) {
            signals.insert(GateName::Integration);
        }
        if BENCH_RE.is_match(segment) {
            signals.insert(GateName::Performance);
        }
    }
    signals
}

fn segments(command: &str) -> impl Iterator<Item = &str> {
    SEGMENT_SPLIT_RE
        .split(command)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
}

fn classify_segment(segment: &str) -> ToolCategory {
    let body = strip_prefixes(segment);
    if MUTATING_RE.is_match(body) || writes_through_redirect(body) {
        return ToolCategory::Mutating;
    }
    if VCS_RE.is_match(body) {
        return ToolCategory::Vcs;
    }
    if BUILD_RE.is_match(body) {
        return ToolCategory::Build;
    }
    if TEST_RE.is_match(body) {
        return ToolCategory::Test;
    }
    let mut words = body.split_whitespace();
    match words.next() {
        Some("git") => match words.next() {
            Some(sub) if READ_ONLY_GIT.contains(&sub) => ToolCategory::ReadOnly,
            Some("branch") if lists_branches(words.clone()) => ToolCategory::ReadOnly,
            Some("remote") if reads_remotes(words.clone()) => ToolCategory::ReadOnly,
            _ => ToolCategory::Vcs,
        },
        Some(program) if READ_ONLY_PROGRAMS.contains(&program) => ToolCategory::ReadOnly,
        _ => ToolCategory::Execute,
    }
}

/// `git branch` with only listing flags. A name argument creates a branch
/// unless a listing flag turns it into a pattern.
fn lists_branches<'a>(args: impl Iterator<Item = &'a str>) -> bool {
    let mut listing = false;
    let mut has_name = false;
    for arg in args {
        let flag = arg.split('=').next().unwrap_or(arg);
        if arg.starts_with('-') {
            let known = GIT_BRANCH_LISTING.contains(&flag) || matches!(flag, "--sort" | "--format");
            if !known {
                return false;
            }
            listing |= GIT_BRANCH_PATTERN_FLAGS.contains(&flag);
        } else {
            has_name = true;
        }
    }
    !has_name || listing
}

/// `git remote`, `git remote -v`, `git remote show origin`, `git remote get-url origin`.
fn reads_remotes<'a>(args: impl Iterator<Item = &'a str>) -> bool {
    let mut args = args.skip_while(|arg| matches!(*arg, "-v" | "--verbose"));
    match args.next() {
        None => true,
        Some(sub) => GIT_REMOTE_READS.contains(&sub),
    }
}

/// Drop env assignments and wrappers with their flags
/// (`FOO=1 sudo time cmd` → `cmd`, `env -i rm x` → `rm x`).
fn strip_prefixes(segment: &str) -> &str {
    let mut rest = segment.trim_start();
    let mut after_wrapper = false;
    loop {
        let Some((first, tail)) = rest.split_once(char::is_whitespace) else {
            return rest;
        };
        let is_assignment = first.contains('=') && !first.starts_with('=');
        let is_wrapper_flag = after_wrapper && first.starts_with('-');
        if WRAPPERS.contains(&first) {
            after_wrapper = true;
            rest = tail.trim_start();
        } else if is_assignment || is_wrapper_flag {
            rest = tail.trim_start();
        } else {
            return rest;
        }
    }
}

fn writes_through_redirect(segment: &str) -> bool {
    REDIRECT_RE
        .captures_iter(segment)
        .filter_map(|caps| caps.get(1))
        .any(|target| !target.as_str().starts_with("/dev/"))
}

fn risk(category: ToolCategory) -> u8 {
    match category {
        ToolCategory::Mutating => 5,
        ToolCategory::Vcs => 4,
        ToolCategory::Execute => 3,
        ToolCategory::Build => 2,
        ToolCategory::Test => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_commands() {
        assert_eq!(classify_command("ls -la src"), ToolCategory::ReadOnly);
        assert_eq!(classify_command("git status"), ToolCategory::ReadOnly);
        assert_eq!(
            classify_command("grep -rn foo src | head -5"),
            ToolCategory::ReadOnly
        );
        assert_eq!(
            classify_command("cat Cargo.toml 2>/dev/null"),
            ToolCategory::ReadOnly
        );
    }

    #[test]
    fn mutating_commands() {
        assert_eq!(classify_command("rm -rf target"), ToolCategory::Mutating);
        assert_eq!(
            classify_command("sed -i 's/a/b/' src/lib.rs"),
            ToolCategory::Mutating
        );
        assert_eq!(
            classify_command("echo hi > notes.txt"),
            ToolCategory::Mutating
        );
        assert_eq!(
            classify_command("cat a.rs | tee b.rs"),
            ToolCategory::Mutating
        );
        assert_eq!(
            classify_command("FOO=1 sudo mv a b"),
            ToolCategory::Mutating
        );
    }

    #[test]
    fn wrappers_do_not_hide_the_real_command() {
        assert_eq!(classify_command("env rm -rf src"), ToolCategory::Mutating);
        assert_eq!(classify_command("env -i FOO=1 mv a b"), ToolCategory::Mutating);
        assert_eq!(
            classify_command("find . -name '*.tmp' | xargs rm"),
            ToolCategory::Mutating
        );
        assert_eq!(classify_command("xargs -0 rm -f"), ToolCategory::Mutating);
        assert_eq!(classify_command("env LANG=C ls"), ToolCategory::ReadOnly);
    }

    #[test]
    fn git_branch_and_remote_depend_on_arguments() {
        assert_eq!(classify_command("git branch"), ToolCategory::ReadOnly);
        assert_eq!(classify_command("git branch -a -v"), ToolCategory::ReadOnly);
        assert_eq!(classify_command("git branch --list 'feat/*'"), ToolCategory::ReadOnly);
        assert_eq!(classify_command("git branch -D main"), ToolCategory::Vcs);
        assert_eq!(classify_command("git branch feature"), ToolCategory::Vcs);
        assert_eq!(classify_command("git branch -m old new"), ToolCategory::Vcs);

        assert_eq!(classify_command("git remote -v"), ToolCategory::ReadOnly);
        assert_eq!(classify_command("git remote show origin"), ToolCategory::ReadOnly);
        assert_eq!(
            classify_command("git remote add fork git@example.com:me/repo.git"),
            ToolCategory::Vcs
        );
        assert_eq!(classify_command("git remote remove origin"), ToolCategory::Vcs);
    }

    #[test]
    fn sort_with_output_file_mutates() {
        assert_eq!(classify_command("sort -u names.txt"), ToolCategory::ReadOnly);
        assert_eq!(
            classify_command("sort -o src/lib.rs src/lib.rs"),
            ToolCategory::Mutating
        );
        assert_eq!(classify_command("sort -no out.txt in.txt"), ToolCategory::Mutating);
        assert_eq!(
            classify_command("sort --output=out.txt in.txt"),
            ToolCategory::Mutating
        );
    }

    #[test]
    fn riskiest_segment_wins() {
        assert_eq!(
            classify_command("cargo test && rm -rf /tmp/x"),
            ToolCategory::Mutating
        );
        assert_eq!(
            classify_command("cargo build && cargo test"),
            ToolCategory::Build
        );
        assert_eq!(classify_command("ls && python run.py"), ToolCategory::Execute);
    }

    #[test]
    fn vcs_and_test_commands() {
        assert_eq!(classify_command("git commit -m wip"), ToolCategory::Vcs);
        assert_eq!(classify_command("git merge feature"), ToolCategory::Vcs);
        assert_eq!(classify_command("cargo test --all"), ToolCategory::Test);
        assert_eq!(classify_command("npm run test"), ToolCategory::Test);
    }

    #[test]
    fn gate_signals_cover_compound_commands() {
        let signals = gate_signals("cargo build && cargo test -- --nocapture");
        assert!(signals.contains(&GateName::Compile));
        assert!(signals.contains(&GateName::Test));
        assert!(gate_signals("git push origin main").contains(&GateName::Integration));
        assert!(gate_signals("cargo bench").contains(&GateName::Performance));
        assert!(gate_signals("ls").is_empty());
    }
}
