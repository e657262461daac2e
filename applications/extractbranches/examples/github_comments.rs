/// Expects to be called like this:
/// env \
///   GITHUB_TOKEN=github_pat_*** \
///   GITHUB_REPOSITORY=NVIDIA/nvidia-container-toolkit \
///   RUST_LOG=trace \
///   cargo run --example github_comments 1024
use extractbranches::{
    business::{CommentStore, GithubComments, RunInfo},
    util::DirectiveScanner,
};

#[tokio::main]
async fn main() {
    let run_info = RunInfo::from_env().unwrap();

    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .parse_default_env()
        .init();

    let arg1: u64 = std::env::args().nth(1).unwrap().parse().unwrap();
    let (owner, repo) = run_info.try_owner_repo().unwrap();

    let comments = GithubComments::from_run_info(&run_info)
        .unwrap()
        .list_comments(&owner, &repo, arg1)
        .await
        .unwrap();

    let scanner = DirectiveScanner::new().unwrap();
    for body in comments.iter().filter_map(|comment| comment.body.as_deref()) {
        println!("{:?}", scanner.scan(body).unwrap());
    }
}
