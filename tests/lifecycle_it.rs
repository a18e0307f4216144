//! Lifecycle legality and pause/resume parity against a reference run that
//! never paused.

mod common;

use caissa::LifecycleController;
use caissa::control::State;

use common::{smoke_config, workdir};

fn performance_series(controller: &LifecycleController) -> Vec<f64> {
    controller
        .orchestrator()
        .expect("orchestrator alive")
        .performance_history()
        .to_vec()
}

#[test]
fn pause_resume_matches_unpaused_reference() {
    // Reference run: three uninterrupted iterations.
    let ref_dir = workdir("ref");
    let mut reference = LifecycleController::new(smoke_config(2024, 3), &ref_dir);
    assert!(reference.start(None).is_success());
    for _ in 0..2 {
        assert!(reference.step().is_success());
    }
    let final_step = reference.step();
    assert!(final_step.is_success());
    let reference_series = performance_series(&reference);
    assert_eq!(reference_series.len(), 3);

    // Paused run: pause after the first iteration, resume, finish.
    let dir = workdir("paused");
    let mut paused = LifecycleController::new(smoke_config(2024, 3), &dir);
    assert!(paused.start(None).is_success());
    assert!(paused.step().is_success());
    assert!(paused.pause().is_success());
    assert_eq!(paused.state(), State::Paused);
    assert!(paused.resume().is_success());
    assert!(paused.step().is_success());
    assert!(paused.step().is_success());
    let paused_series = performance_series(&paused);

    assert_eq!(paused_series, reference_series, "pause/resume must not perturb the run");

    std::fs::remove_dir_all(&ref_dir).ok();
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn no_transition_outside_the_diagram() {
    let dir = workdir("diagram");
    let mut controller = LifecycleController::new(smoke_config(5, 2), &dir);

    // Stopped: only start is legal.
    assert!(!controller.pause().is_success());
    assert!(!controller.resume().is_success());
    assert!(controller.stop().is_success(), "stop is idempotent when stopped");
    assert_eq!(controller.state(), State::Stopped);

    // Running: start again is illegal, pause is legal.
    assert!(controller.start(None).is_success());
    assert!(!controller.start(None).is_success());
    assert!(!controller.resume().is_success());
    assert_eq!(controller.state(), State::Running);

    // Paused: pause again is illegal.
    assert!(controller.pause().is_success());
    assert!(!controller.pause().is_success());
    assert_eq!(controller.state(), State::Paused);

    // Paused -> Stopped is legal.
    assert!(controller.stop().is_success());
    assert_eq!(controller.state(), State::Stopped);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn completion_and_restart() {
    let dir = workdir("complete");
    let mut controller = LifecycleController::new(smoke_config(6, 2), &dir);
    assert!(controller.start(None).is_success());
    assert!(controller.run_to_completion().is_success());
    assert_eq!(controller.state(), State::Completed);

    // restart = stop + start.
    assert!(controller.restart(None).is_success());
    assert_eq!(controller.state(), State::Running);
    assert!(controller.stop().is_success());
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn session_bookkeeping_is_recorded() {
    let dir = workdir("book");
    let mut controller = LifecycleController::new(smoke_config(7, 2), &dir);
    controller.start(None);
    let session = controller.session().unwrap();
    assert_eq!(session.state, State::Running);
    assert!(session.error.is_none());

    controller.pause();
    controller.resume();
    controller.stop();
    let session = controller.session().unwrap();
    assert!(session.paused_time.is_some());
    assert!(session.resumed_time.is_some());
    assert!(session.end_time.is_some());
    std::fs::remove_dir_all(&dir).ok();
}
