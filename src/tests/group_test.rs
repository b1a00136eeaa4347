#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use nix::sys::signal::Signal;

    use crate::clock::MonotonicClock;
    use crate::error::ProcessError;
    use crate::group::{AutoRestart, GroupConfig, GroupState, ProcessGroup};
    use crate::process::ProcessState;
    use crate::syscalls::PosixSyscalls;

    fn group_with(config: GroupConfig) -> ProcessGroup {
        ProcessGroup::with_clock_and_syscalls(
            config,
            Box::new(MonotonicClock::new()),
            Box::new(PosixSyscalls),
        )
    }

    fn poll_until<F: Fn(&ProcessGroup) -> bool>(group: &mut ProcessGroup, done: F) {
        let start = std::time::Instant::now();
        while !done(group) && start.elapsed() < Duration::from_secs(5) {
            group.monitor_children().expect("monitor_children should not error");
            thread::sleep(Duration::from_millis(50));
        }
    }

    #[test]
    fn spawn_rejects_missing_command() {
        let config = GroupConfig::new("web").with_argv(vec![]).with_envp(vec![]).with_numprocs(1);
        let mut group = group_with(config);
        let err = group.spawn_children().expect_err("no cmd configured");
        assert!(matches!(err, ProcessError::MissingCommand));
    }

    #[test]
    fn spawn_rejects_missing_argv_even_with_cmd_set() {
        let config = GroupConfig::new("web")
            .with_cmd("/bin/true")
            .with_envp(vec![])
            .with_numprocs(1);
        let mut group = group_with(config);
        let err = group.spawn_children().expect_err("argv never configured");
        assert!(matches!(err, ProcessError::MissingArgv));
    }

    #[test]
    fn spawn_accepts_explicitly_empty_envp() {
        let config = GroupConfig::new("web")
            .with_cmd("/bin/true")
            .with_argv(vec!["true".into()])
            .with_envp(vec![])
            .with_numprocs(1);
        let mut group = group_with(config);
        group.spawn_children().expect("empty-but-present envp is valid");
        poll_until(&mut group, |g| g.all_exited());
        assert_eq!(group.children()[0].exit_code(), Some(0));
    }

    #[test]
    fn spawn_rejects_zero_numprocs() {
        let config = GroupConfig::new("web")
            .with_cmd("/bin/true")
            .with_argv(vec!["true".into()])
            .with_envp(vec![]);
        let mut group = group_with(config);
        let err = group.spawn_children().expect_err("numprocs defaults to 0");
        assert!(matches!(err, ProcessError::NoProcesses));
    }

    #[test]
    fn replicas_all_start_and_reach_running() {
        let config = GroupConfig::new("worker")
            .with_cmd("/bin/sleep")
            .with_argv(vec!["sleep".into(), "2".into()])
            .with_envp(vec![])
            .with_numprocs(3)
            .with_start_time(0);
        let mut group = group_with(config);
        group.spawn_children().expect("spawn should succeed");

        poll_until(&mut group, |g| g.running_count() == 3);
        assert_eq!(group.running_count(), 3);
        assert_eq!(group.group_state(), GroupState::Running);

        group.stop_children().expect("stop should succeed");
        poll_until(&mut group, |g| g.all_exited());
        assert_eq!(group.group_state(), GroupState::Stopped);
    }

    #[test]
    fn numprocs_one_with_autorestart_never_does_not_respawn() {
        let config = GroupConfig::new("oneshot")
            .with_cmd("/bin/true")
            .with_argv(vec!["true".into()])
            .with_envp(vec![])
            .with_numprocs(1)
            .with_start_time(0)
            .with_autorestart(AutoRestart::Never)
            .with_start_retries(5);
        let mut group = group_with(config);
        group.spawn_children().expect("spawn should succeed");

        poll_until(&mut group, |g| g.children()[0].state() == ProcessState::Exited);
        // give a few more passes a chance to incorrectly respawn
        for _ in 0..5 {
            group.monitor_children().expect("monitor_children should not error");
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(group.children()[0].state(), ProcessState::Exited);
        assert_eq!(group.children()[0].retries_count(), 0);
    }

    #[test]
    fn exitcodes_allowlist_boundary_under_unexpected_policy() {
        let mut exitcodes = std::collections::HashSet::new();
        exitcodes.insert(0);
        exitcodes.insert(2);
        let config = GroupConfig::new("flaky")
            .with_cmd("/bin/sh")
            .with_argv(vec!["sh".into(), "-c".into(), "exit 2".into()])
            .with_envp(vec![])
            .with_numprocs(1)
            .with_start_time(0)
            .with_autorestart(AutoRestart::Unexpected)
            .with_exitcodes(exitcodes)
            .with_start_retries(3);
        let mut group = group_with(config);
        group.spawn_children().expect("spawn should succeed");

        poll_until(&mut group, |g| g.children()[0].state() == ProcessState::Exited);
        // exit code 2 is allowlisted: no restart should ever be attempted.
        for _ in 0..5 {
            group.monitor_children().expect("monitor_children should not error");
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(group.children()[0].state(), ProcessState::Exited);
        assert_eq!(group.children()[0].retries_count(), 0);
    }

    #[test]
    fn unexpected_exit_outside_allowlist_is_restarted_up_to_budget() {
        let config = GroupConfig::new("crashy")
            .with_cmd("/bin/sh")
            .with_argv(vec!["sh".into(), "-c".into(), "exit 1".into()])
            .with_envp(vec![])
            .with_numprocs(1)
            .with_start_time(0)
            .with_autorestart(AutoRestart::Unexpected)
            .with_start_retries(2)
            .with_backoff_delay_s(0);
        let mut group = group_with(config);
        group.spawn_children().expect("spawn should succeed");

        poll_until(&mut group, |g| {
            g.children()[0].state() == ProcessState::Exited && g.children()[0].retries_count() == 2
        });

        // The budget is spent entering backoff, not respawning: the final
        // allowed attempt must actually run and exit rather than park in
        // `Stopped` forever.
        assert_eq!(group.children()[0].state(), ProcessState::Exited);
        assert_eq!(group.children()[0].retries_count(), 2);
        assert_eq!(group.children()[0].exit_code(), Some(1));
        assert!(group.has_fatal_processes());
        assert_eq!(group.group_state(), GroupState::Fatal);
    }

    #[test]
    fn final_retry_attempt_still_runs_and_exits() {
        // start_retries=1: first exit spends the only backoff attempt, the
        // respawned second attempt must run to completion rather than stall
        // in `Stopped` (spec.md §8 scenario 3).
        let config = GroupConfig::new("flaky-once")
            .with_cmd("/bin/false")
            .with_argv(vec!["false".into()])
            .with_envp(vec![])
            .with_numprocs(1)
            .with_start_time(0)
            .with_autorestart(AutoRestart::Unexpected)
            .with_start_retries(1)
            .with_backoff_delay_s(0);
        let mut group = group_with(config);
        group.spawn_children().expect("spawn should succeed");

        poll_until(&mut group, |g| g.children()[0].retries_count() == 1);
        assert_eq!(group.children()[0].state(), ProcessState::Backoff);

        poll_until(&mut group, |g| g.children()[0].state() == ProcessState::Exited);

        assert_eq!(group.children()[0].state(), ProcessState::Exited);
        assert_eq!(group.children()[0].retries_count(), 1);
        assert_eq!(group.children()[0].exit_code(), Some(1));
        assert!(group.has_fatal_processes());
    }

    #[test]
    fn stop_child_rejects_out_of_range_id() {
        let config = GroupConfig::new("web")
            .with_cmd("/bin/true")
            .with_argv(vec!["true".into()])
            .with_envp(vec![])
            .with_numprocs(1);
        let mut group = group_with(config);
        group.spawn_children().expect("spawn should succeed");

        let err = group.stop_child(99).expect_err("id 99 doesn't exist");
        assert!(matches!(err, ProcessError::InvalidChildId(99)));
    }

    #[test]
    fn always_policy_restarts_a_deliberately_stopped_child() {
        let config = GroupConfig::new("daemon")
            .with_cmd("/bin/sleep")
            .with_argv(vec!["sleep".into(), "1".into()])
            .with_envp(vec![])
            .with_numprocs(1)
            .with_start_time(0)
            .with_autorestart(AutoRestart::Always)
            .with_start_retries(10)
            .with_backoff_delay_s(0)
            .with_stop_signal(Signal::SIGTERM)
            .with_stop_timeout(1);
        let mut group = group_with(config);
        group.spawn_children().expect("spawn should succeed");

        poll_until(&mut group, |g| g.running_count() == 1);
        let first_pid = group.children()[0].pid();

        poll_until(&mut group, |g| g.children()[0].retries_count() >= 1);
        assert!(group.children()[0].retries_count() >= 1);
        let _ = first_pid;

        group.stop_child(0).ok();
        poll_until(&mut group, |g| g.children()[0].state() != ProcessState::Running);
    }
}
