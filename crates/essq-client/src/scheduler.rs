//! Command lines and output parsing for the supported batch schedulers.

use crate::error::{ClientError, Result};
use crate::hosts::RemoteCommand;
use essq_core::constants::files;
use essq_core::model::ClusterSoftware;
use regex::Regex;

/// Where a job stands in the scheduler's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Queued,
    Running,
    /// The scheduler holds the job in an error state.
    Errored,
    /// The job no longer appears in the queue.
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduler {
    software: ClusterSoftware,
}

impl Scheduler {
    pub fn new(software: ClusterSoftware) -> Self {
        Self { software }
    }

    pub fn software(&self) -> ClusterSoftware {
        self.software
    }

    pub fn submit_command(&self, submit_file: &str) -> RemoteCommand {
        let program = match self.software {
            ClusterSoftware::Slurm => "sbatch",
            ClusterSoftware::Oge | ClusterSoftware::Sge | ClusterSoftware::Pbs => "qsub",
            ClusterSoftware::HtCondor => "condor_submit",
        };
        RemoteCommand::new(program).arg(submit_file)
    }

    pub fn parse_job_id(&self, output: &str) -> Result<String> {
        let pattern = match self.software {
            ClusterSoftware::Slurm => r"Submitted batch job (\d+)",
            ClusterSoftware::Oge | ClusterSoftware::Sge => r"Your job(?:-array)? (\d+)",
            ClusterSoftware::Pbs => r"^\s*(\d+)",
            ClusterSoftware::HtCondor => r"submitted to cluster (\d+)",
        };
        let re = Regex::new(pattern).map_err(|e| ClientError::JobIdParse {
            scheduler: self.software.to_string(),
            output: e.to_string(),
        })?;
        re.captures(output)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ClientError::JobIdParse {
                scheduler: self.software.to_string(),
                output: output.trim().to_string(),
            })
    }

    /// Lists every job of `username`; the caller picks its own line out.
    pub fn status_command(&self, username: &str) -> RemoteCommand {
        match self.software {
            ClusterSoftware::Slurm => RemoteCommand::new("squeue")
                .arg("-h")
                .arg("-u")
                .arg(username)
                .arg("-o")
                .arg("%i %t"),
            ClusterSoftware::Oge | ClusterSoftware::Sge | ClusterSoftware::Pbs => {
                RemoteCommand::new("qstat").arg("-u").arg(username)
            }
            ClusterSoftware::HtCondor => RemoteCommand::new("condor_q")
                .arg("-nobatch")
                .arg(username)
                .arg("-af")
                .arg("ClusterId")
                .arg("JobStatus"),
        }
    }

    pub fn parse_status(&self, job_id: &str, output: &str) -> QueueState {
        for line in output.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let Some(first) = fields.first() else {
                continue;
            };
            let id = first.split('.').next().unwrap_or(first);
            if id != job_id {
                continue;
            }
            return match self.software {
                ClusterSoftware::Slurm => slurm_state(fields.get(1).copied().unwrap_or("")),
                ClusterSoftware::Oge | ClusterSoftware::Sge => {
                    sge_state(fields.get(4).copied().unwrap_or(""))
                }
                ClusterSoftware::Pbs => {
                    let state = fields.len().checked_sub(2).and_then(|i| fields.get(i));
                    pbs_state(state.copied().unwrap_or(""))
                }
                ClusterSoftware::HtCondor => condor_state(fields.get(1).copied().unwrap_or("")),
            };
        }
        QueueState::Absent
    }

    pub fn delete_command(&self, job_id: &str) -> RemoteCommand {
        let program = match self.software {
            ClusterSoftware::Slurm => "scancel",
            ClusterSoftware::Oge | ClusterSoftware::Sge | ClusterSoftware::Pbs => "qdel",
            ClusterSoftware::HtCondor => "condor_rm",
        };
        RemoteCommand::new(program).arg(job_id)
    }

    /// Files in a job directory holding the scheduler's own stdout/stderr.
    pub fn native_output_files(&self, listing: &[String], job_id: &str) -> Vec<String> {
        match self.software {
            ClusterSoftware::Slurm => listing
                .iter()
                .filter(|name| name.starts_with("slurm") && name.ends_with(".out"))
                .cloned()
                .collect(),
            ClusterSoftware::Pbs => listing
                .iter()
                .filter(|name| {
                    name.ends_with(&format!(".o{}", job_id))
                        || name.ends_with(&format!(".e{}", job_id))
                })
                .cloned()
                .collect(),
            ClusterSoftware::Oge | ClusterSoftware::Sge | ClusterSoftware::HtCondor => listing
                .iter()
                .filter(|name| {
                    name.as_str() == files::SGE_STDOUT || name.as_str() == files::SGE_STDERR
                })
                .cloned()
                .collect(),
        }
    }
}

fn slurm_state(code: &str) -> QueueState {
    match code {
        "PD" | "CF" | "S" | "RQ" | "RH" => QueueState::Queued,
        "F" | "NF" | "BF" | "OOM" | "DL" => QueueState::Errored,
        "CD" | "CA" | "TO" | "PR" => QueueState::Absent,
        _ => QueueState::Running,
    }
}

fn sge_state(code: &str) -> QueueState {
    if code.contains('E') {
        QueueState::Errored
    } else if code.contains('q') || code.contains('h') {
        QueueState::Queued
    } else {
        QueueState::Running
    }
}

fn pbs_state(code: &str) -> QueueState {
    match code {
        "Q" | "H" | "W" | "T" | "S" => QueueState::Queued,
        "F" | "X" => QueueState::Absent,
        _ => QueueState::Running,
    }
}

fn condor_state(code: &str) -> QueueState {
    match code {
        "1" | "7" => QueueState::Queued,
        "5" => QueueState::Errored,
        "3" | "4" => QueueState::Absent,
        _ => QueueState::Running,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_ids() {
        let slurm = Scheduler::new(ClusterSoftware::Slurm);
        assert_eq!(slurm.parse_job_id("Submitted batch job 123456\n").unwrap(), "123456");

        let sge = Scheduler::new(ClusterSoftware::Sge);
        assert_eq!(
            sge.parse_job_id("Your job 4242 (\"opt_a7\") has been submitted").unwrap(),
            "4242"
        );
        assert_eq!(
            sge.parse_job_id("Your job-array 77.1-4:1 (\"opt_a8\") has been submitted").unwrap(),
            "77"
        );

        let pbs = Scheduler::new(ClusterSoftware::Pbs);
        assert_eq!(pbs.parse_job_id("9001.head-node\n").unwrap(), "9001");

        let condor = Scheduler::new(ClusterSoftware::HtCondor);
        assert_eq!(
            condor.parse_job_id("Submitting job(s).\n1 job(s) submitted to cluster 58.\n").unwrap(),
            "58"
        );

        assert!(slurm.parse_job_id("sbatch: error: invalid partition").is_err());
    }

    #[test]
    fn test_slurm_status_lines() {
        let slurm = Scheduler::new(ClusterSoftware::Slurm);
        let output = "100 R\n101 PD\n102 F\n";
        assert_eq!(slurm.parse_status("100", output), QueueState::Running);
        assert_eq!(slurm.parse_status("101", output), QueueState::Queued);
        assert_eq!(slurm.parse_status("102", output), QueueState::Errored);
        assert_eq!(slurm.parse_status("103", output), QueueState::Absent);
    }

    #[test]
    fn test_sge_status_table() {
        let sge = Scheduler::new(ClusterSoftware::Oge);
        let output = "\
job-ID  prior   name       user         state submit/start at     queue   slots
-----------------------------------------------------------------------------
   5001 0.50500 opt_a1     alice        r     03/01/2024 10:00:00 all.q@n1  8
   5002 0.50500 opt_a2     alice        qw    03/01/2024 10:00:00           8
   5003 0.50500 opt_a3     alice        Eqw   03/01/2024 10:00:00           8
";
        assert_eq!(sge.parse_status("5001", output), QueueState::Running);
        assert_eq!(sge.parse_status("5002", output), QueueState::Queued);
        assert_eq!(sge.parse_status("5003", output), QueueState::Errored);
        assert_eq!(sge.parse_status("5004", output), QueueState::Absent);
    }

    #[test]
    fn test_pbs_status_table() {
        let pbs = Scheduler::new(ClusterSoftware::Pbs);
        let output = "\
9001.head alice batch opt_a1 1234 1 8 14gb 120:00 R 00:10
9002.head alice batch opt_a2 --   1 8 14gb 120:00 Q --
";
        assert_eq!(pbs.parse_status("9001", output), QueueState::Running);
        assert_eq!(pbs.parse_status("9002", output), QueueState::Queued);
    }

    #[test]
    fn test_condor_status_codes() {
        let condor = Scheduler::new(ClusterSoftware::HtCondor);
        let output = "58 2\n59 1\n60 5\n";
        assert_eq!(condor.parse_status("58", output), QueueState::Running);
        assert_eq!(condor.parse_status("59", output), QueueState::Queued);
        assert_eq!(condor.parse_status("60", output), QueueState::Errored);
    }

    #[test]
    fn test_commands() {
        let slurm = Scheduler::new(ClusterSoftware::Slurm);
        assert_eq!(slurm.submit_command("submit.sl").to_shell_string(), "sbatch 'submit.sl'");
        assert_eq!(slurm.delete_command("12").to_shell_string(), "scancel '12'");
        assert_eq!(
            slurm.status_command("alice").to_shell_string(),
            "squeue '-h' '-u' 'alice' '-o' '%i %t'"
        );
        let pbs = Scheduler::new(ClusterSoftware::Pbs);
        assert_eq!(pbs.delete_command("9").to_shell_string(), "qdel '9'");
    }

    #[test]
    fn test_native_output_files() {
        let listing: Vec<String> = ["slurm-12.out", "output.out", "out.txt", "err.txt", "job.o12"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let slurm = Scheduler::new(ClusterSoftware::Slurm);
        assert_eq!(slurm.native_output_files(&listing, "12"), vec!["slurm-12.out"]);
        let sge = Scheduler::new(ClusterSoftware::Sge);
        assert_eq!(sge.native_output_files(&listing, "12"), vec!["out.txt", "err.txt"]);
        let pbs = Scheduler::new(ClusterSoftware::Pbs);
        assert_eq!(pbs.native_output_files(&listing, "12"), vec!["job.o12"]);
    }
}
