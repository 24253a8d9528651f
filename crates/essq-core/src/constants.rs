pub mod keywords {
    pub const CHECK_FILE: &str = "CheckFile";
    pub const INTERNAL_COORDINATE_ERROR: &str = "InternalCoordinateError";
    pub const MAX_OPT_CYCLES: &str = "MaxOptCycles";
    pub const UNCONVERGED: &str = "Unconverged";
    pub const SCF: &str = "SCF";
    pub const MEMORY: &str = "Memory";
    pub const CPU: &str = "cpu";
    pub const DISK_SPACE: &str = "DiskSpace";
    pub const SERVER_TIME_LIMIT: &str = "ServerTimeLimit";
    /// Recorded when the requested memory was clamped to the host ceiling.
    pub const MAX_TOTAL_JOB_MEMORY: &str = "max_total_job_memory";
}

pub mod files {
    pub const OUTPUT: &str = "output.out";
    pub const BATCH_DATA: &str = "data.json";
    pub const CHECK_FILE: &str = "check.chk";
    pub const JOB_RECORD: &str = "job.json";
    pub const SGE_STDOUT: &str = "out.txt";
    pub const SGE_STDERR: &str = "err.txt";
}

pub mod registry {
    pub const COUNTER: &str = "job_counter";
    pub const LOCK: &str = "job_counter.lock";
    pub const INITIATED: &str = "initiated_jobs.jsonl";
    pub const COMPLETED: &str = "completed_jobs.jsonl";
    pub const VERSION: u32 = 2;
}

pub mod numbering {
    /// Job numbers wrap back to zero when they reach this value.
    pub const WRAP_AT: u32 = 100_000;
}

pub mod dirs {
    pub const CALCS: &str = "calcs";
    pub const SPECIES: &str = "Species";
    pub const TSS: &str = "TSs";
    pub const TS_GUESSES: &str = "TS_guesses";
}
