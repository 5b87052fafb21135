// Some basic data types so that we can avoid tying ourselves to a particular integer width or
// stringly-typed identifier.

pub type GpuIndex = u32;
pub type Pid = u32;

// Jobs are identified by a UUID-v4 string (see job::Job::new). The scheduler never parses this
// value, it only compares and hashes it, so a plain String is the right representation -- no need
// to pull uuid::Uuid through every public signature in the crate.
pub type JobId = String;

// Unix timestamp, seconds since epoch. See time::unix_now().
pub type Timestamp = u64;
