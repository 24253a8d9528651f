use super::common::shell_quote;

/// A shell command line whose arguments are quoted as they are added.
#[derive(Debug, Clone)]
pub struct RemoteCommand {
    workdir: Option<String>,
    words: Vec<String>,
}

impl RemoteCommand {
    pub fn new(program: &str) -> Self {
        Self {
            workdir: None,
            words: vec![program.to_string()],
        }
    }

    /// Runs `command` after changing into `dir`.
    pub fn in_dir(dir: &str, command: RemoteCommand) -> Self {
        Self {
            workdir: Some(dir.to_string()),
            ..command
        }
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.words.push(shell_quote(arg));
        self
    }

    pub fn to_shell_string(&self) -> String {
        let line = self.words.join(" ");
        match &self.workdir {
            Some(dir) => format!("cd {} && {}", shell_quote(dir), line),
            None => line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_are_quoted() {
        let cmd = RemoteCommand::new("chmod").arg("+x").arg("/home/a b/submit.sh");
        assert_eq!(cmd.to_shell_string(), "chmod '+x' '/home/a b/submit.sh'");
    }

    #[test]
    fn test_single_quote_escaping() {
        let cmd = RemoteCommand::new("cat").arg("it's.out");
        assert_eq!(cmd.to_shell_string(), "cat 'it'\\''s.out'");
    }

    #[test]
    fn test_in_dir_changes_directory_first() {
        let cmd = RemoteCommand::in_dir("runs/p/H2O/opt_a12", RemoteCommand::new("sbatch").arg("submit.sl"));
        assert_eq!(
            cmd.to_shell_string(),
            "cd 'runs/p/H2O/opt_a12' && sbatch 'submit.sl'"
        );
    }
}
