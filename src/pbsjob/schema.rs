use std::collections::HashMap;
use std::sync::OnceLock;

use super::job::Job;

/// Absolute file offset at which the first attribute payload starts.
pub const JOB_ATTR_START_POS: usize = 1120;
/// Fixed zero padding trailing every attribute record.
pub const JOB_ATTR_PADDING: usize = 80;
/// `length` value of the dummy header terminating the attribute list.
pub const JOB_ATTR_END_FLAG: i32 = -711;
/// Size of the attribute record header: six little-endian i32 fields.
pub const ATTR_HEADER_SIZE: usize = 24;

static JOB_SCHEMA: OnceLock<JobSchema> = OnceLock::new();

/// Read-only view of one schema slot inside a [`Job`].
pub enum SlotRef<'a> {
    Int(&'a i64),
    Str(&'a str),
    List(&'a [String]),
}

/// Writable view of one schema slot inside a [`Job`].
pub enum SlotMut<'a> {
    Int(&'a mut i64),
    Str(&'a mut String),
    List(&'a mut Vec<String>),
}

/// One wire attribute bound to its slot in the [`Job`] record.
pub struct AttrSpec {
    pub name: &'static str,
    pub resource: &'static str,
    pub separator: &'static str,
    pub get: fn(&Job) -> SlotRef<'_>,
    pub get_mut: fn(&mut Job) -> SlotMut<'_>,
}

/// Declarative schema of the job file: the attribute list in wire order
/// plus a `(name, resource)` lookup index. Built once per process.
pub struct JobSchema {
    specs: Vec<AttrSpec>,
    index: HashMap<String, usize>,
}

fn index_key(name: &str, resource: &str) -> String {
    format!("{name}\0{resource}")
}

impl JobSchema {
    pub fn get() -> &'static JobSchema {
        JOB_SCHEMA.get_or_init(Self::build)
    }

    fn build() -> Self {
        let specs = job_attributes();
        let mut index = HashMap::with_capacity(specs.len());

        for (i, spec) in specs.iter().enumerate() {
            let previous = index.insert(index_key(spec.name, spec.resource), i);
            if previous.is_some() {
                panic!(
                    "duplicate job attribute '{}' resource '{}'",
                    spec.name, spec.resource
                );
            }
        }

        JobSchema { specs, index }
    }

    pub fn lookup(&self, name: &str, resource: &str) -> Option<&AttrSpec> {
        self.index
            .get(&index_key(name, resource))
            .map(|&i| &self.specs[i])
    }

    /// Attributes in declaration order; encoding follows this order so
    /// output is byte-reproducible for a given input.
    pub fn specs(&self) -> &[AttrSpec] {
        &self.specs
    }
}

/// Length of a wire field including its terminator; empty fields occupy
/// no bytes at all.
pub fn attr_length(length: usize, terminator: usize) -> usize {
    if length > 0 {
        length + terminator
    } else {
        0
    }
}

// One row per wire attribute. The job file format supports exactly a name
// and an optional resource, which is why slot paths are at most two deep.
macro_rules! attr {
    ($name:literal / $resource:literal, $kind:ident, $($path:ident).+, sep = $sep:literal) => {
        AttrSpec {
            name: $name,
            resource: $resource,
            separator: $sep,
            get: |job| SlotRef::$kind(&job.$($path).+),
            get_mut: |job| SlotMut::$kind(&mut job.$($path).+),
        }
    };
    ($name:literal / $resource:literal, $kind:ident, $($path:ident).+) => {
        attr!($name / $resource, $kind, $($path).+, sep = ",")
    };
}

fn job_attributes() -> Vec<AttrSpec> {
    vec![
        attr!("Job_Name" / "", Str, job_name),
        attr!("Job_Owner" / "", Str, job_owner),
        attr!("resources_used" / "cpupercent", Int, resources_used.cpupercent),
        attr!("resources_used" / "cpus", List, resources_used.cpus),
        attr!("resources_used" / "cput", Str, resources_used.cput),
        attr!("resources_used" / "mem", Int, resources_used.mem),
        attr!("resources_used" / "ncpus", Int, resources_used.ncpus),
        attr!("resources_used" / "ngpus", Int, resources_used.ngpus),
        attr!("resources_used" / "vmem", Int, resources_used.vmem),
        attr!("resources_used" / "walltime", Str, resources_used.walltime),
        attr!("job_state" / "", Str, job_state),
        attr!("queue" / "", Str, queue),
        attr!("server" / "", Str, server),
        attr!("Checkpoint" / "", Str, checkpoint),
        attr!("Error_Path" / "", Str, error_path),
        attr!("exec_host2" / "", List, exec_host, sep = "+"),
        attr!("exec_vnode" / "", List, exec_vnode, sep = "+"),
        attr!("interactive" / "", Int, interactive),
        attr!("Join_Path" / "", Str, join_path),
        attr!("Keep_Files" / "", Str, keep_files),
        attr!("mtime" / "", Int, mtime),
        attr!("Output_Path" / "", Str, output_path),
        attr!("Resource_List" / "mem", Int, resource_list.mem),
        attr!("Resource_List" / "ncpus", Int, resource_list.ncpus),
        attr!("Resource_List" / "nfpgas", Int, resource_list.nfpgas),
        attr!("Resource_List" / "ngpus", Int, resource_list.ngpus),
        attr!("Resource_List" / "place", Str, resource_list.place),
        attr!("Resource_List" / "walltime", Str, resource_list.walltime),
        attr!("schedselect" / "", List, sched_select, sep = ":"),
        attr!("stime" / "", Int, stime),
        attr!("session_id" / "", Str, session_id),
        attr!("Shell_Path_List" / "", Str, shell_path_list),
        attr!("jobdir" / "", Str, job_dir),
        attr!("substate" / "", Str, substate),
        attr!("Variable_List" / "", List, variable_list),
        attr!("euser" / "", Str, euser),
        attr!("egroup" / "", Str, egroup),
        attr!("hashname" / "", Str, hashname),
        attr!("cookie" / "", Str, cookie),
        attr!("umask" / "", Str, umask),
        attr!("run_count" / "", Int, run_count),
        attr!("job_kill_delay" / "", Str, job_kill_delay),
        attr!("executable" / "", Str, executable),
        attr!("argument_list" / "", Str, argument_list),
        attr!("project" / "", Str, project),
        attr!("run_version" / "", Str, run_version),
        attr!("Submit_Host" / "", Str, submit_host),
        attr!("binding" / "", List, binding, sep = ":"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_length() {
        let tests = [(0, 0, 0), (0, 1, 0), (0, 2, 0), (1, 0, 1), (1, 1, 2), (4, 2, 6)];
        for (length, terminator, want) in tests {
            assert_eq!(attr_length(length, terminator), want);
        }
    }

    #[test]
    fn test_schema_lookup() {
        let schema = JobSchema::get();

        assert!(schema.lookup("Job_Name", "").is_some());
        assert!(schema.lookup("resources_used", "mem").is_some());
        assert!(schema.lookup("Resource_List", "walltime").is_some());
        assert!(schema.lookup("Job_Name", "mem").is_none());
        assert!(schema.lookup("no_such_attribute", "").is_none());
    }

    #[test]
    fn test_schema_order() {
        let schema = JobSchema::get();
        let specs = schema.specs();

        // declaration order is the wire order
        assert_eq!(specs[0].name, "Job_Name");
        assert_eq!(specs[1].name, "Job_Owner");
        assert_eq!((specs[2].name, specs[2].resource), ("resources_used", "cpupercent"));
        assert_eq!(specs.last().map(|s| s.name), Some("binding"));
    }

    #[test]
    fn test_schema_separators() {
        let schema = JobSchema::get();

        assert_eq!(schema.lookup("exec_host2", "").unwrap().separator, "+");
        assert_eq!(schema.lookup("schedselect", "").unwrap().separator, ":");
        assert_eq!(schema.lookup("binding", "").unwrap().separator, ":");
        assert_eq!(schema.lookup("Variable_List", "").unwrap().separator, ",");
    }

    #[test]
    fn test_schema_slot_access() {
        let schema = JobSchema::get();
        let mut job = Job::default();

        let spec = schema.lookup("resources_used", "mem").unwrap();
        match (spec.get_mut)(&mut job) {
            SlotMut::Int(field) => *field = 123,
            _ => panic!("resources_used.mem should be an integer slot"),
        }
        assert_eq!(job.resources_used.mem, 123);

        match (spec.get)(&job) {
            SlotRef::Int(field) => assert_eq!(*field, 123),
            _ => panic!("resources_used.mem should be an integer slot"),
        }
    }
}
