//! Combinators over fake substeps.

use hodei_steps_core::{
    BufferStreamer, CodependentStep, EmitProgressStep, EmittableError, OutputWrapperStep,
    ParallelStep, ProcessSpec, RunStep, SerialStep, SharedBuffer, SharedStep, Step, StepError,
    TokioClock, TryStep,
};
use hodei_steps_testing::{
    FailingReader, FakeContainer, FakeProcess, FakeStep, RecordingStreamer, capture_logs,
};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

fn shared(step: &Arc<FakeStep>) -> SharedStep {
    step.clone()
}

fn spawn_perform<S: Step + 'static>(
    step: &Arc<S>,
) -> tokio::task::JoinHandle<Result<(), StepError>> {
    let step = step.clone();
    tokio::spawn(async move { step.perform().await })
}

mod parallel {
    use super::*;

    #[tokio::test]
    async fn test_performs_every_substep() {
        let first = FakeStep::succeeding().shared();
        let second = FakeStep::succeeding().shared();

        let step = ParallelStep::new(vec![shared(&first), shared(&second)]);

        assert!(step.perform().await.is_ok());
        assert_eq!(first.perform_count(), 1);
        assert_eq!(second.perform_count(), 1);
    }

    #[tokio::test]
    async fn test_waits_for_all_substeps_after_a_failure() {
        let failing = FakeStep::failing("oh no!").shared();
        let slow = FakeStep::blocking_then(|| Ok(())).shared();

        let step = Arc::new(ParallelStep::new(vec![shared(&failing), shared(&slow)]));
        let task = spawn_perform(&step);

        slow.wait_for_performs(1).await;
        failing.wait_for_performs(1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        assert_eq!(failing.cancel_count(), 0);

        slow.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "oh no!");
    }

    #[tokio::test]
    async fn test_joins_failures_with_semicolons() {
        let first = FakeStep::failing("oh no").shared();
        let second = FakeStep::failing("oh my").shared();

        let err = ParallelStep::new(vec![shared(&first), shared(&second)])
            .perform()
            .await
            .unwrap_err();

        let StepError::Aggregate(aggregate) = &err else {
            panic!("expected an aggregate, got {:?}", err);
        };
        assert_eq!(aggregate.len(), 2);
        let message = err.to_string();
        assert!(message == "oh no; oh my" || message == "oh my; oh no", "{}", message);
    }

    #[tokio::test]
    async fn test_cancellations_are_not_failures() {
        let blocked = FakeStep::blocking().shared();
        let failing = FakeStep::failing("oh no!").shared();

        let step = Arc::new(ParallelStep::new(vec![shared(&blocked), shared(&failing)]));
        let task = spawn_perform(&step);
        blocked.wait_for_performs(1).await;
        step.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "oh no!");
        assert_eq!(blocked.cancel_count(), 1);
        assert_eq!(failing.cancel_count(), 1);
    }

    #[tokio::test]
    async fn test_only_cancellations_is_success() {
        let first = FakeStep::blocking().shared();
        let second = FakeStep::blocking().shared();

        let step = Arc::new(ParallelStep::new(vec![shared(&first), shared(&second)]));
        let task = spawn_perform(&step);
        first.wait_for_performs(1).await;
        second.wait_for_performs(1).await;
        step.cancel();

        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_before_perform_reaches_substeps() {
        let first = FakeStep::blocking().shared();
        let step = ParallelStep::new(vec![shared(&first)]);

        step.cancel();
        step.cancel();

        assert!(step.perform().await.is_ok());
        assert_eq!(first.cancel_count(), 2);
    }
}

mod codependent {
    use super::*;

    #[tokio::test]
    async fn test_all_substeps_succeed() {
        let first = FakeStep::succeeding().shared();
        let second = FakeStep::succeeding().shared();

        let step = CodependentStep::new(vec![shared(&first), shared(&second)], false);

        assert!(step.perform().await.is_ok());
        assert_eq!(first.perform_count(), 1);
        assert_eq!(second.perform_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_cancels_every_substep_once() {
        let failing = FakeStep::failing("oh no!").shared();
        let other = FakeStep::blocking().shared();

        let step = CodependentStep::new(vec![shared(&failing), shared(&other)], false);
        let err = step.perform().await.unwrap_err();

        assert_eq!(err.to_string(), "oh no!");
        assert_eq!(failing.cancel_count(), 1);
        assert_eq!(other.cancel_count(), 1);
    }

    #[tokio::test]
    async fn test_multiple_failures_are_joined() {
        let first = FakeStep::failing("oh no").shared();
        let second = FakeStep::failing("oh my").shared();

        let err = CodependentStep::new(vec![shared(&first), shared(&second)], false)
            .perform()
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(!message.starts_with(';'));
        assert!(message.contains("oh no"));
        assert!(message.contains("oh my"));
        assert!(message.contains("; "));
    }

    #[tokio::test]
    async fn test_exit_without_error_on_exit_keeps_siblings_running() {
        let exiting = FakeStep::succeeding().shared();
        let sibling = FakeStep::blocking_then(|| Err(StepError::other("I was cancelled yo."))).shared();

        let step = Arc::new(CodependentStep::new(
            vec![shared(&exiting), shared(&sibling)],
            false,
        ));
        let task = spawn_perform(&step);

        sibling.wait_for_performs(1).await;
        exiting.wait_for_performs(1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        assert_eq!(sibling.cancel_count(), 0);

        step.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "I was cancelled yo.");
    }

    #[tokio::test]
    async fn test_exit_with_error_on_exit_cancels_the_group() {
        let exiting = FakeStep::succeeding().shared();
        let sibling = FakeStep::blocking_then(|| Err(StepError::other("I was cancelled yo."))).shared();

        let step = CodependentStep::new(vec![shared(&exiting), shared(&sibling)], true);
        let err = step.perform().await.unwrap_err();

        let StepError::Aggregate(aggregate) = &err else {
            panic!("expected an aggregate, got {:?}", err);
        };
        assert_eq!(aggregate.len(), 2);
        assert!(
            aggregate
                .errors()
                .iter()
                .any(|e| matches!(e, StepError::CodependentExited))
        );
        assert!(err.to_string().contains("I was cancelled yo."));
        assert!(err.to_string().contains("Codependent step exited"));
        assert_eq!(exiting.cancel_count(), 1);
        assert_eq!(sibling.cancel_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_substeps_are_dropped_from_the_aggregate() {
        let failing = FakeStep::failing("oh no!").shared();
        let cancelled = FakeStep::returning(|| Err(StepError::Cancelled)).shared();

        let err = CodependentStep::new(vec![shared(&failing), shared(&cancelled)], false)
            .perform()
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "oh no!");
    }

    #[tokio::test]
    async fn test_cancel_reaches_every_substep() {
        let steps: Vec<_> = (0..3).map(|_| FakeStep::blocking().shared()).collect();
        let step = CodependentStep::new(steps.iter().map(shared).collect(), false);

        step.cancel();
        step.cancel();

        for substep in &steps {
            assert_eq!(substep.cancel_count(), 1);
        }
    }
}

mod serial {
    use super::*;

    #[tokio::test]
    async fn test_runs_in_order_and_stops_at_first_failure() {
        let first = FakeStep::succeeding().shared();
        let second = FakeStep::failing("second broke").shared();
        let third = FakeStep::succeeding().shared();

        let err = SerialStep::new(vec![shared(&first), shared(&second), shared(&third)])
            .perform()
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "second broke");
        assert_eq!(first.perform_count(), 1);
        assert_eq!(second.perform_count(), 1);
        assert_eq!(third.perform_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_reaches_every_substep() {
        let first = FakeStep::blocking().shared();
        let second = FakeStep::succeeding().shared();
        let step = Arc::new(SerialStep::new(vec![shared(&first), shared(&second)]));

        let task = spawn_perform(&step);
        first.wait_for_performs(1).await;
        step.cancel();

        assert!(matches!(task.await.unwrap(), Err(StepError::Cancelled)));
        assert_eq!(second.cancel_count(), 1);
        assert_eq!(second.perform_count(), 0);
    }
}

mod try_step {
    use super::*;

    #[tokio::test]
    async fn test_swallows_and_logs_failure() {
        let logs = capture_logs();
        let failing = FakeStep::failing("oh no!").shared();

        let result = TryStep::new(shared(&failing))
            .with_action("post-setup hook")
            .perform()
            .await;

        assert!(result.is_ok());
        assert_eq!(failing.perform_count(), 1);
        assert!(logs.contains("failed"));
        assert!(logs.contains("post-setup hook"));
        assert!(logs.contains("oh no!"));
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let step = FakeStep::succeeding().shared();
        assert!(TryStep::new(shared(&step)).perform().await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_is_forwarded() {
        let substep = FakeStep::blocking().shared();
        let step = TryStep::new(shared(&substep));

        step.cancel();

        assert_eq!(substep.cancel_count(), 1);
        assert!(step.perform().await.is_ok());
    }
}

mod output_wrapper {
    use super::*;

    fn reader(text: &str) -> hodei_steps_core::ByteStream {
        Box::new(Cursor::new(text.as_bytes().to_vec()))
    }

    #[tokio::test]
    async fn test_success_leaves_reader_untouched() {
        let substep = FakeStep::succeeding().shared();
        let buffer = SharedBuffer::new();
        std::io::Write::write_all(&mut buffer.clone(), b"unread").unwrap();

        let step = OutputWrapperStep::new(shared(&substep), Box::new(buffer.clone()));

        assert!(step.perform().await.is_ok());
        assert_eq!(buffer.to_string_lossy(), "unread");
    }

    #[tokio::test]
    async fn test_failure_is_replaced_by_trimmed_output() {
        let substep = FakeStep::failing("exit status 1").shared();
        let step = OutputWrapperStep::new(shared(&substep), reader("\r\nerror reason\r\n"));

        let err = step.perform().await.unwrap_err();

        let emittable = err.as_emittable().expect("emittable error");
        assert_eq!(emittable.message(), "error reason");
        assert_eq!(
            emittable.wrapped_error().map(|e| e.to_string()).as_deref(),
            Some("exit status 1")
        );
    }

    #[tokio::test]
    async fn test_empty_output_keeps_original_error() {
        let substep = FakeStep::failing("exit status 1").shared();
        let step = OutputWrapperStep::new(shared(&substep), reader(" \n\t"));

        let err = step.perform().await.unwrap_err();
        assert!(err.as_emittable().is_none());
        assert_eq!(err.to_string(), "exit status 1");
    }

    #[tokio::test]
    async fn test_cancellation_passes_through_when_output_is_empty() {
        let substep = FakeStep::blocking().shared();
        let step = Arc::new(OutputWrapperStep::new(shared(&substep), reader("")));

        let task = spawn_perform(&step);
        substep.wait_for_performs(1).await;
        step.cancel();

        assert!(matches!(task.await.unwrap(), Err(StepError::Cancelled)));
    }

    #[tokio::test]
    async fn test_read_failure_is_returned() {
        let substep = FakeStep::failing("exit status 1").shared();
        let step = OutputWrapperStep::new(
            shared(&substep),
            Box::new(FailingReader::new("broken pipe")),
        );

        let err = step.perform().await.unwrap_err();
        assert_eq!(err.to_string(), "broken pipe");
    }

    #[tokio::test]
    async fn test_captures_health_check_process_output() {
        let container = FakeContainer::new();
        let process = FakeProcess::new();
        container.push_process(process.clone());

        let buffer = SharedBuffer::new();
        let check = Arc::new(
            RunStep::new(
                container.clone(),
                ProcessSpec::new("/tmp/lifecycle/healthcheck").with_args(["-port=8080"]),
                Arc::new(BufferStreamer::new(buffer.clone())),
                TokioClock::shared(),
            )
            .with_suppressed_exit_status(),
        );
        let step = Arc::new(OutputWrapperStep::new(check, Box::new(buffer)));
        let task = spawn_perform(&step);

        container
            .wait_for_process()
            .await
            .write_stdout("failed to make TCP connection to port 8080: connection refused\n");
        process.exit(1);

        let err = task.await.unwrap().unwrap_err();
        let emittable = err.as_emittable().expect("emittable error");
        assert_eq!(
            emittable.message(),
            "failed to make TCP connection to port 8080: connection refused"
        );
        assert_eq!(
            emittable.wrapped_error().map(|e| e.to_string()).as_deref(),
            Some("Exited with status 1")
        );
    }
}

mod emit_progress {
    use super::*;

    fn progress(substep: &Arc<FakeStep>, streamer: &Arc<RecordingStreamer>) -> EmitProgressStep {
        EmitProgressStep::new(shared(substep), streamer.clone())
            .with_start_message("STARTING")
            .with_success_message("SUCCESS")
            .with_failure_message("FAILURE")
    }

    #[tokio::test]
    async fn test_start_and_success_messages() {
        let streamer = RecordingStreamer::new();
        let substep = FakeStep::succeeding().shared();

        progress(&substep, &streamer).perform().await.unwrap();

        assert_eq!(streamer.stdout_text(), "STARTING\nSUCCESS\n");
        assert_eq!(streamer.stderr_text(), "");
    }

    #[tokio::test]
    async fn test_plain_failure_writes_failure_message_only() {
        let streamer = RecordingStreamer::new();
        let substep = FakeStep::failing("internal detail").shared();

        let err = progress(&substep, &streamer).perform().await.unwrap_err();

        assert_eq!(err.to_string(), "internal detail");
        assert_eq!(streamer.stdout_text(), "STARTING\n");
        assert_eq!(streamer.stderr_text(), "FAILURE\n");
    }

    #[tokio::test]
    async fn test_emittable_failure_is_appended() {
        let logs = capture_logs();
        let streamer = RecordingStreamer::new();
        let substep = FakeStep::returning(|| {
            Err(EmittableError::wrap("wrapped detail", "Downloading failed").into())
        })
        .shared();

        let err = progress(&substep, &streamer).perform().await.unwrap_err();

        assert!(err.as_emittable().is_some());
        assert_eq!(streamer.stderr_text(), "FAILURE: Downloading failed\n");
        assert!(logs.contains("errored"));
        assert!(logs.contains("wrapped detail"));
    }

    #[tokio::test]
    async fn test_empty_messages_are_skipped() {
        let streamer = RecordingStreamer::new();
        let substep = FakeStep::failing("oh no").shared();

        let step = EmitProgressStep::new(shared(&substep), streamer.clone());
        step.perform().await.unwrap_err();

        assert_eq!(streamer.stdout_text(), "");
        assert_eq!(streamer.stderr_text(), "");
    }

    #[tokio::test]
    async fn test_cancel_is_forwarded() {
        let streamer = RecordingStreamer::new();
        let substep = FakeStep::blocking().shared();
        let step = progress(&substep, &streamer);

        step.cancel();

        assert!(matches!(step.perform().await, Err(StepError::Cancelled)));
        assert_eq!(substep.cancel_count(), 1);
        assert_eq!(streamer.stderr_text(), "FAILURE\n");
    }
}
