//! Integration tests for the AssetPipeline orchestrator
//!
//! A small shell script stands in for git so the tests exercise real
//! subprocess handling without network access. These tests verify:
//! - A public clone with a missing category completes with one skip
//! - A failing clone ends in Failed with the tool's output preserved
//! - Progress only ever moves forward
//! - Secrets never reach the stored output or the checkout's git config
//! - Relocation and cleanup problems are warnings, never failures
//! - A second start while a run is active is refused

#![cfg(unix)]

use assetpull::models::{
    CredentialInput, Credentials, FailureDetail, Phase, PipelineConfig, SourceLocator,
};
use assetpull::services::credentials::clone_url;
use assetpull::services::{AssetPipeline, GitService, PipelineError};
use assetpull::StateChange;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use tempfile::TempDir;

const CLONE_OK: &str = r#"
if [ "$1" = "clone" ]; then
  dest="$4"
  printf '%s\n' "$@" > "$ARGS_FILE"
  printf 'prompt=%s\n' "$GIT_TERMINAL_PROMPT" >> "$ARGS_FILE"
  printf "Cloning into '%s'...\n" "$dest" >&2
  printf 'Receiving objects:  10%% (1/10)\rReceiving objects:  55%% (6/10)\rReceiving objects: 100%% (10/10), done.\n' >&2
  mkdir -p "$dest/3dModel" "$dest/Plugins/Editor" "$dest/Scripts/Player" "$dest/Materials" "$dest/Resources"
  echo mesh > "$dest/3dModel/ship.fbx"
  echo dll > "$dest/Plugins/Editor/Build.dll"
  echo B > "$dest/Scripts/Foo.cs"
  echo player > "$dest/Scripts/Player/Controller.cs"
  echo mat > "$dest/Materials/Hull.mat"
  echo json > "$dest/Resources/table.json"
  mkdir -p "$dest/.git/objects/pack"
  echo pack > "$dest/.git/objects/pack/pack-1.pack"
  chmod 444 "$dest/.git/objects/pack/pack-1.pack"
  exit 0
fi
exit 0
"#;

const CLONE_AUTH_FAIL: &str = r#"
if [ "$1" = "clone" ]; then
  printf "Cloning into '%s'...\n" "$4" >&2
  printf "fatal: Authentication failed for '%s'\n" "$3" >&2
  exit 1
fi
exit 0
"#;

const CLONE_KILLED: &str = r#"
if [ "$1" = "clone" ]; then
  kill -9 $$
fi
exit 0
"#;

const CLONE_SLOW: &str = r#"
if [ "$1" = "clone" ]; then
  sleep 2
  mkdir -p "$4/UI"
  exit 0
fi
exit 0
"#;

const CLONE_UI_LOOP: &str = r#"
if [ "$1" = "clone" ]; then
  dest="$4"
  mkdir -p "$dest/UI" "$dest/Scripts"
  echo prefab > "$dest/UI/Menu.prefab"
  ln -s "$dest/UI" "$dest/UI/Loop"
  echo B > "$dest/Scripts/Foo.cs"
  exit 0
fi
exit 0
"#;

// Leaves a plain file where the scratch directory was, which no directory
// removal can delete
const CLONE_SCRATCH_REPLACED: &str = r#"
if [ "$1" = "clone" ]; then
  rm -rf "$4"
  echo stray > "$4"
  exit 0
fi
exit 0
"#;

const CLONE_FAIL_SCRATCH_REPLACED: &str = r#"
if [ "$1" = "clone" ]; then
  rm -rf "$4"
  echo stray > "$4"
  echo "fatal: repository not found" >&2
  exit 128
fi
exit 0
"#;

const CLONE_WRITES_REMOTE: &str = r#"
if [ "$1" = "clone" ]; then
  mkdir -p "$4/.git"
  printf '[remote "origin"]\n\turl = %s\n' "$3" > "$4/.git/config"
  exit 0
fi
if [ "$1" = "remote" ] && [ "$2" = "set-url" ]; then
  printf '[remote "origin"]\n\turl = %s\n' "$4" > .git/config
  exit 0
fi
exit 1
"#;

const PULL_OK: &str = r#"
if [ "$1" = "pull" ]; then
  echo "Updating 1a2b3c..4d5e6f"
  echo "Fast-forward"
  pwd
  exit 0
fi
exit 1
"#;

struct Fixture {
    _temp: TempDir,
    root: Utf8PathBuf,
    git: Utf8PathBuf,
    args_file: Utf8PathBuf,
}

impl Fixture {
    fn new(body: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let args_file = root.join("args.txt");

        let bin = root.join("bin");
        fs::create_dir_all(&bin).unwrap();
        let git = bin.join("git");
        let script = format!("#!/bin/sh\nARGS_FILE='{}'\n{}", args_file, body);
        fs::write(&git, script).unwrap();
        fs::set_permissions(&git, fs::Permissions::from_mode(0o755)).unwrap();

        Self {
            _temp: temp,
            root,
            git,
            args_file,
        }
    }

    fn destination(&self) -> Utf8PathBuf {
        self.root.join("Assets")
    }

    fn pipeline(&self) -> Arc<AssetPipeline> {
        let mut config = PipelineConfig::default();
        config.destination_root = self.destination();
        config.tool.program = self.git.to_string();
        Arc::new(AssetPipeline::new(config).unwrap())
    }
}

fn progress_values(events: &mut tokio::sync::broadcast::Receiver<StateChange>) -> Vec<f32> {
    let mut values = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let StateChange::ProgressUpdated { progress, .. } = event {
            values.push(progress);
        }
    }
    values
}

#[tokio::test]
async fn test_public_clone_completes_with_one_skip() {
    let fixture = Fixture::new(CLONE_OK);
    // Existing project file that the bundle replaces
    fs::create_dir_all(fixture.destination().join("Scripts")).unwrap();
    fs::write(fixture.destination().join("Scripts/Foo.cs"), "A\n").unwrap();

    let pipeline = fixture.pipeline();
    let run = pipeline
        .start(
            SourceLocator::github("studio", "bundle", false),
            CredentialInput::anonymous(),
        )
        .unwrap();
    let mut events = run.subscribe();
    let state = run.wait().await;

    assert_eq!(state.phase, Phase::Complete, "{}", state.summary());
    assert_eq!(state.progress, 1.0);
    assert_eq!(state.status, "Download and installation complete!");
    assert!(state.error.is_none());
    assert!(state.warnings.is_empty(), "{:?}", state.warnings);

    let report = state.relocation.as_ref().unwrap();
    assert_eq!(report.skipped_count(), 1);
    assert_eq!(report.skipped().collect::<Vec<_>>(), vec!["UI"]);
    assert_eq!(report.total_files_copied(), 6);

    let dest = fixture.destination();
    assert_eq!(fs::read_to_string(dest.join("Scripts/Foo.cs")).unwrap(), "B\n");
    assert!(dest.join("Scripts/Player/Controller.cs").is_file());
    assert!(dest.join("Plugins/Editor/Build.dll").is_file());
    assert!(dest.join("UI").is_dir());
    assert!(!dest.join("AssetPullTemp").exists());

    let progress = progress_values(&mut events);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);

    let args = fs::read_to_string(&fixture.args_file).unwrap();
    assert!(args.contains("--progress"));
    assert!(args.contains("https://github.com/studio/bundle.git"));
    assert!(args.contains("prompt=0"));
}

#[tokio::test]
async fn test_clone_failure_preserves_output() {
    let fixture = Fixture::new(CLONE_AUTH_FAIL);
    let pipeline = fixture.pipeline();

    let run = pipeline
        .start(
            SourceLocator::github("studio", "bundle", true),
            CredentialInput::with_token("ghp_supersecret123"),
        )
        .unwrap();
    let state = run.wait().await;

    assert_eq!(state.phase, Phase::Failed);
    match &state.error {
        Some(FailureDetail::Clone { exit_code, output }) => {
            assert_eq!(*exit_code, 1);
            assert!(output.contains("ERROR: fatal: Authentication failed"), "{}", output);
            assert!(!output.contains("ghp_supersecret123"), "{}", output);
        }
        other => panic!("unexpected failure detail: {:?}", other),
    }
    assert!(!state.status.contains("ghp_supersecret123"));
    assert!(!fixture.destination().join("AssetPullTemp").exists());
    assert!(!pipeline.is_running());
}

#[tokio::test]
async fn test_relocation_warnings_still_complete() {
    let fixture = Fixture::new(CLONE_UI_LOOP);
    let pipeline = fixture.pipeline();

    let run = pipeline
        .start(
            SourceLocator::github("studio", "bundle", false),
            CredentialInput::anonymous(),
        )
        .unwrap();
    let state = run.wait().await;

    assert_eq!(state.phase, Phase::Complete, "{}", state.summary());
    assert_eq!(state.progress, 1.0);
    assert!(state.error.is_none());
    assert!(
        state.warnings.iter().any(|w| w.starts_with("UI: ")),
        "{:?}",
        state.warnings
    );
    assert!(fixture.destination().join("UI/Menu.prefab").is_file());
    assert!(fixture.destination().join("Scripts/Foo.cs").is_file());
    assert!(!fixture.destination().join("AssetPullTemp").exists());
}

#[tokio::test]
async fn test_cleanup_failure_still_completes() {
    let fixture = Fixture::new(CLONE_SCRATCH_REPLACED);
    let pipeline = fixture.pipeline();

    let run = pipeline
        .start(
            SourceLocator::github("studio", "bundle", false),
            CredentialInput::anonymous(),
        )
        .unwrap();
    let state = run.wait().await;

    assert_eq!(state.phase, Phase::Complete, "{}", state.summary());
    assert_eq!(state.progress, 1.0);
    assert!(state.error.is_none());
    assert!(
        state
            .warnings
            .iter()
            .any(|w| w.contains("Manual cleanup may be required")),
        "{:?}",
        state.warnings
    );
    assert_eq!(state.relocation.as_ref().unwrap().skipped_count(), 6);
    assert_eq!(pipeline.metrics().cleanup_warnings.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_cleanup_failure_after_failed_clone_is_recorded() {
    let fixture = Fixture::new(CLONE_FAIL_SCRATCH_REPLACED);
    let pipeline = fixture.pipeline();

    let run = pipeline
        .start(
            SourceLocator::github("studio", "bundle", false),
            CredentialInput::anonymous(),
        )
        .unwrap();
    let state = run.wait().await;

    assert_eq!(state.phase, Phase::Failed);
    assert!(matches!(
        state.error,
        Some(FailureDetail::Clone { exit_code: 128, .. })
    ));
    assert_eq!(state.warnings.len(), 1, "{:?}", state.warnings);
    assert!(state.warnings[0].contains("Manual cleanup may be required"));
}

#[tokio::test]
async fn test_clone_leaves_no_secret_in_git_config() {
    let fixture = Fixture::new(CLONE_WRITES_REMOTE);
    let checkout = fixture.root.join("checkout");
    let git = GitService::new(fixture.git.to_string());
    let url = clone_url(
        &SourceLocator::github("studio", "bundle", true),
        &Credentials::Token("ghp_supersecret123".to_string()),
    )
    .unwrap();

    git.clone_repo(&url, &checkout, |_, _| {}).await.unwrap();

    let config = fs::read_to_string(checkout.join(".git/config")).unwrap();
    assert!(!config.contains("ghp_supersecret123"), "{}", config);
    assert!(config.contains("url = https://github.com/studio/bundle.git"));
}

#[tokio::test]
async fn test_killed_tool_reports_negative_exit_code() {
    let fixture = Fixture::new(CLONE_KILLED);
    let pipeline = fixture.pipeline();

    let run = pipeline
        .start(
            SourceLocator::github("studio", "bundle", false),
            CredentialInput::anonymous(),
        )
        .unwrap();
    let state = run.wait().await;

    assert_eq!(state.phase, Phase::Failed);
    assert!(matches!(
        state.error,
        Some(FailureDetail::Clone { exit_code: -1, .. })
    ));
}

#[tokio::test]
async fn test_second_start_is_refused_while_running() {
    let fixture = Fixture::new(CLONE_SLOW);
    let pipeline = fixture.pipeline();
    let source = SourceLocator::github("studio", "bundle", false);

    let first = pipeline
        .start(source.clone(), CredentialInput::anonymous())
        .unwrap();
    let second = pipeline.start(source.clone(), CredentialInput::anonymous());

    assert!(matches!(second, Err(PipelineError::AlreadyRunning { .. })));

    let state = first.wait().await;
    assert_eq!(state.phase, Phase::Complete);
    assert!(fixture.destination().join("UI").is_dir());

    // The instance accepts a new run once the first one is done
    let third = pipeline.start(source, CredentialInput::anonymous()).unwrap();
    assert_eq!(third.wait().await.phase, Phase::Complete);
}

#[tokio::test]
async fn test_pull_reports_updating_lines() {
    let fixture = Fixture::new(PULL_OK);
    let checkout = fixture.root.join("checkout");
    fs::create_dir_all(&checkout).unwrap();

    let git = GitService::new(fixture.git.to_string());
    let mut statuses = Vec::new();
    git.pull(&checkout, |status| statuses.push(status.to_string()))
        .await
        .unwrap();

    assert_eq!(statuses[0], "Updating: Updating 1a2b3c..4d5e6f");
    assert_eq!(statuses[1], "Updating: Fast-forward");
    assert!(statuses[2].ends_with("checkout"));
}

#[tokio::test]
async fn test_detect_accepts_configured_path() {
    let fixture = Fixture::new(PULL_OK);
    let git = GitService::new(fixture.git.to_string());

    assert!(git.is_available());
    let detected = git.detect().unwrap();
    assert!(detected.ends_with(Utf8Path::new("bin/git")), "{}", detected);
}
