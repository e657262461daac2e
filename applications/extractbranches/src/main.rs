/// This application is designed to be executed as a step of a GitHub Actions workflow that is
/// triggered by `pull_request` or `issue_comment` events.
/// It publishes the release branches requested via `/cherry-pick` as the `branches` step output.
///
use std::path::Path;

use extractbranches::business::{self, GithubComments, LogDiagnostics, RunInfo};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let run_info = RunInfo::from_env()?;

    let (owner, repo) = run_info.try_owner_repo()?;
    let event = run_info.try_event()?;

    let store = GithubComments::from_run_info(&run_info)?;
    let diagnostics = LogDiagnostics::from_run_info(&run_info);

    let branches = business::extract_branches(
        &store,
        &diagnostics,
        &owner,
        &repo,
        event.pr_number(),
        event.pr_body(),
    )
    .await?;

    business::publish_branches(&branches, run_info.output_path().as_deref().map(Path::new))?;

    Ok(())
}

