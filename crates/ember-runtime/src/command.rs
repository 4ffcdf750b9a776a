//! Command-mode argument vector and paths

use ember_config::CommandConfig;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Build argv from a command line: the program name, then every
/// whitespace-separated token, capped at `max_args` entries in total.
pub fn tokenize(program: &str, command_line: &str, max_args: usize) -> Vec<String> {
    let mut argv = Vec::with_capacity(max_args.min(16));
    argv.push(program.to_string());

    let mut tokens = command_line.split_whitespace();
    argv.extend(
        tokens
            .by_ref()
            .take(max_args.saturating_sub(1))
            .map(str::to_string),
    );

    let dropped = tokens.count();
    if dropped > 0 {
        warn!(max_args, dropped, "Command line truncated");
    }

    argv
}

/// Filesystem locations used by one command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPaths {
    /// Directory the process switches to before construction
    pub working_dir: PathBuf,
    /// Script executed as the command entry point
    pub entry_script: PathBuf,
}

impl CommandPaths {
    /// Resolve configured paths against the app public directory
    pub fn resolve(app_public_path: &Path, config: &CommandConfig) -> Self {
        Self {
            working_dir: app_public_path.join(&config.working_dir),
            entry_script: app_public_path.join(&config.entry_script),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        let argv = tokenize("ember", "  migrate   --force\tnow ", 127);
        assert_eq!(argv, vec!["ember", "migrate", "--force", "now"]);
    }

    #[test]
    fn test_tokenize_empty_line() {
        assert_eq!(tokenize("ember", "", 127), vec!["ember"]);
        assert_eq!(tokenize("ember", "   ", 127), vec!["ember"]);
    }

    #[test]
    fn test_tokenize_caps_argument_count() {
        let line = (0..200).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let argv = tokenize("ember", &line, 127);

        assert_eq!(argv.len(), 127);
        assert_eq!(argv[0], "ember");
        assert_eq!(argv[126], "125");
    }

    #[test]
    fn test_resolve_paths() {
        let paths = CommandPaths::resolve(Path::new("/srv/app/public"), &CommandConfig::default());
        assert_eq!(paths.working_dir, PathBuf::from("/srv/app/public/.."));
        assert_eq!(paths.entry_script, PathBuf::from("/srv/app/public/../runner"));
    }
}
