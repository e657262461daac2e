pub mod util {
    use std::collections::HashSet;

    use anyhow::{Context, Result};
    use pcre2::bytes::{Regex, RegexBuilder};

    /// A line starting with `/cherry-pick` (after optional blanks), followed by the requested branches.
    /// The blank classes exclude line breaks so a directive never reaches into the next line.
    /// Lines may end in `\n`, `\r\n` or a lone `\r`.
    const DIRECTIVE_RE: &str = r"(*ANYCRLF)^[^\S\r\n]*/cherry-pick[^\S\r\n]+(.+)$";
    const BRANCH_RE: &str = r"release-\d+\.\d+(?:\.\d+)?";

    /// Finds release branches requested by `/cherry-pick` directives in free text.
    pub struct DirectiveScanner {
        directive_re: Regex,
        branch_re: Regex,
    }

    impl DirectiveScanner {
        pub fn new() -> Result<Self> {
            let directive_re = RegexBuilder::new()
                .caseless(true)
                .multi_line(true)
                .utf(true)
                .ucp(true)
                .build(DIRECTIVE_RE)
                .context(format!("compiling '{DIRECTIVE_RE}'"))?;
            let branch_re = RegexBuilder::new()
                .build(BRANCH_RE)
                .context(format!("compiling '{BRANCH_RE}'"))?;

            Ok(Self {
                directive_re,
                branch_re,
            })
        }

        /// Returns all branch tokens of all directive lines in `text`, in order of appearance.
        pub fn scan(&self, text: &str) -> Result<Vec<String>> {
            let mut branches = vec![];

            for caps in self.directive_re.captures_iter(text.as_bytes()) {
                let caps = caps?;
                let Some(remainder) = caps.get(1) else {
                    continue;
                };

                for branch in self.branch_re.find_iter(remainder.as_bytes()) {
                    let branch = String::from_utf8_lossy(branch?.as_bytes()).into_owned();
                    log::trace!("found '{branch}' in directive");
                    branches.push(branch);
                }
            }

            Ok(branches)
        }
    }

    /// Removes repeated entries, keeping the first occurrence of each.
    pub fn dedup_first_seen(items: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        items
            .into_iter()
            .filter(|item| seen.insert(item.clone()))
            .collect()
    }

}

pub mod business {
    use anyhow::{anyhow, bail, Context, Result};
    use core::time;
    use log::{debug, info, trace, warn};
    use reqwest::header::USER_AGENT;
    use serde_json::Value;
    use std::{io::Write, path::Path};

    use super::util::{dedup_first_seen, DirectiveScanner};

    /// Names a TOML or JSON file whose values sit between the defaults and the environment.
    pub const CONFIG_FILE_ENV_KEY: &str = "EXTRACTBRANCHES_CONFIG";

    // keys as they appear after the environment has been lowercased by `config`
    const REPOSITORY_KEY: &str = "github_repository";
    const EVENT_PATH_KEY: &str = "github_event_path";
    const TOKEN_KEY: &str = "github_token";
    const API_URL_KEY: &str = "github_api_url";
    const OUTPUT_KEY: &str = "github_output";
    const ACTIONS_KEY: &str = "github_actions";

    const DEFAULT_API_URL: &str = "https://api.github.com";
    const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(10);

    /// Information about the workflow run, layered from defaults, an optional file and the environment.
    #[derive(Debug)]
    pub struct RunInfo(config::Config);

    impl RunInfo {
        pub fn from_env() -> Result<Self> {
            let mut builder = config::Config::builder().set_default(API_URL_KEY, DEFAULT_API_URL)?;

            if let Ok(path) = std::env::var(CONFIG_FILE_ENV_KEY) {
                debug!("reading configuration from {path}");
                builder = builder.add_source(config::File::with_name(&path));
            }

            let config = builder
                .add_source(config::Environment::default())
                .build()
                .context("loading configuration")?;

            Ok(Self(config))
        }

        pub fn from_config(config: config::Config) -> Self {
            Self(config)
        }

        // allows looking up variables in the layered configuration
        pub fn get(&self, key: &str) -> Result<String> {
            self.0
                .get_string(key)
                .context(format!("looking up {key} in the configuration"))
        }

        fn get_non_empty(&self, key: &str) -> Option<String> {
            self.get(key).ok().filter(|value| !value.is_empty())
        }

        /// Example: GITHUB_REPOSITORY=NVIDIA/nvidia-container-toolkit
        pub fn try_owner_repo(&self) -> Result<(String, String)> {
            let value = self.get(REPOSITORY_KEY)?;

            match value.split_once('/') {
                Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() => {
                    Ok((owner.to_string(), repo.to_string()))
                }
                _ => bail!("couldn't parse repository {value}"),
            }
        }

        /// Reads the payload of the event that triggered the workflow.
        pub fn try_event(&self) -> Result<EventInfo> {
            let path = self.get(EVENT_PATH_KEY)?;
            let raw = std::fs::read_to_string(&path)
                .context(format!("reading event payload from {path}"))?;

            EventInfo::from_json(&raw).context(format!("parsing event payload from {path}"))
        }

        pub fn token(&self) -> Option<String> {
            let token = self.get_non_empty(TOKEN_KEY);

            if let Some(value) = &token {
                let redacted_value = redacted_tail(value);
                debug!("token found at '{TOKEN_KEY}=..{redacted_value}'");
            } else {
                debug!("no token found at '{TOKEN_KEY}', requests will be anonymous");
            }

            token
        }

        pub fn api_url(&self) -> Result<String> {
            Ok(self.get(API_URL_KEY)?.trim_end_matches('/').to_string())
        }

        pub fn output_path(&self) -> Option<String> {
            self.get_non_empty(OUTPUT_KEY)
        }

        pub fn is_github_actions(&self) -> bool {
            self.get(ACTIONS_KEY)
                .map(|value| value == "true")
                .unwrap_or_default()
        }
    }

    /// The last few characters of a secret, never more than half of it.
    fn redacted_tail(value: &str) -> &str {
        let value_reveal_start = std::cmp::max(3, value.len() / 8).min(value.len() / 2);
        value
            .get(value.len() - value_reveal_start..)
            .unwrap_or("<unknown>")
    }

    /// The webhook payload of a `pull_request` or `issue_comment` event.
    #[derive(Debug)]
    pub struct EventInfo(Value);

    impl EventInfo {
        pub fn from_json(raw: &str) -> Result<Self> {
            let value: Value = serde_json::from_str(raw)?;
            if !value.is_object() {
                bail!("expected a JSON object, got {raw}");
            }

            Ok(Self(value))
        }

        /// The pull-request number, falling back to the issue number for comment events.
        pub fn pr_number(&self) -> Option<u64> {
            ["pull_request", "issue"].into_iter().find_map(|key| {
                self.0
                    .get(key)
                    .and_then(|level1value| level1value.get("number"))
                    .and_then(Value::as_u64)
                    .filter(|number| *number != 0)
            })
        }

        pub fn pr_body(&self) -> Option<&str> {
            self.0
                .get("pull_request")
                .and_then(|level1value| level1value.get("body"))
                .and_then(Value::as_str)
                .filter(|body| !body.is_empty())
        }
    }

    /// A comment on an issue or pull request.
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Comment {
        pub body: Option<String>,
    }

    impl Comment {
        pub fn new(body: &str) -> Self {
            Self {
                body: Some(body.to_string()),
            }
        }
    }

    /// Read access to the comments of an issue.
    #[allow(async_fn_in_trait)]
    pub trait CommentStore {
        /// Returns the comments in the order the store lists them.
        async fn list_comments(
            &self,
            owner: &str,
            repo: &str,
            issue_number: u64,
        ) -> Result<Vec<Comment>>;
    }

    /// Lists issue comments through the GitHub REST API.
    pub struct GithubComments {
        client: reqwest::Client,
        api_url: String,
        token: Option<String>,
    }

    impl GithubComments {
        pub fn new(api_url: impl Into<String>, token: Option<String>) -> Self {
            Self::with_client(reqwest::Client::new(), api_url, token)
        }

        pub fn with_client(
            client: reqwest::Client,
            api_url: impl Into<String>,
            token: Option<String>,
        ) -> Self {
            Self {
                client,
                api_url: api_url.into(),
                token,
            }
        }

        pub fn from_run_info(run_info: &RunInfo) -> Result<Self> {
            Ok(Self::new(run_info.api_url()?, run_info.token()))
        }
    }

    impl CommentStore for GithubComments {
        // only the first page is fetched
        async fn list_comments(
            &self,
            owner: &str,
            repo: &str,
            issue_number: u64,
        ) -> Result<Vec<Comment>> {
            let url = format!(
                "{}/repos/{owner}/{repo}/issues/{issue_number}/comments",
                self.api_url
            );
            let mut req = self
                .client
                .get(&url)
                .header("Accept", "application/vnd.github+json")
                .header("X-GitHub-Api-Version", "2022-11-28")
                .header(
                    USER_AGENT,
                    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")),
                )
                .timeout(REQUEST_TIMEOUT);
            if let Some(token) = &self.token {
                req = req.bearer_auth(token);
            }

            debug!("{url} request: {req:#?}");

            let response = req
                .send()
                .await
                .context(format!("querying {url}"))?
                .error_for_status()
                .context(format!("querying {url}"))?
                .text()
                .await?;

            let level0value: Value =
                serde_json::from_str(&response).context(format!("parsing response of {url}"))?;
            let comments = level0value
                .as_array()
                .ok_or_else(|| anyhow!("expected a JSON array from {url}, got {response}"))?
                .iter()
                .map(|comment| Comment {
                    body: comment
                        .get("body")
                        .and_then(Value::as_str)
                        .map(ToString::to_string),
                })
                .collect::<Vec<_>>();

            debug!("got {} comment(s) from {url}", comments.len());

            Ok(comments)
        }
    }

    /// Where the extractor reports its outcome.
    pub trait Diagnostics {
        fn warning(&self, message: &str);
        fn info(&self, message: &str);
    }

    /// Reports through `log`, and as workflow annotations when running in GitHub Actions.
    pub struct LogDiagnostics {
        annotate: bool,
    }

    impl LogDiagnostics {
        pub fn new(annotate: bool) -> Self {
            Self { annotate }
        }

        pub fn from_run_info(run_info: &RunInfo) -> Self {
            Self::new(run_info.is_github_actions())
        }
    }

    impl Diagnostics for LogDiagnostics {
        fn warning(&self, message: &str) {
            warn!("{message}");
            if self.annotate {
                println!("::warning::{message}");
            }
        }

        fn info(&self, message: &str) {
            info!("{message}");
        }
    }

    /// Collects the release branches requested via `/cherry-pick` in the PR body and its comments.
    ///
    /// The body is scanned before the comments. Each branch is returned once, in the order it
    /// was first requested. A missing PR number or absent directives are not errors and yield
    /// an empty list, while a failing comment fetch is passed on to the caller.
    pub async fn extract_branches<S: CommentStore, D: Diagnostics>(
        store: &S,
        diagnostics: &D,
        owner: &str,
        repo: &str,
        pr_number: Option<u64>,
        pr_body: Option<&str>,
    ) -> Result<Vec<String>> {
        let Some(pr_number) = pr_number else {
            diagnostics.warning("Could not determine PR number from event - skipping backport");
            return Ok(vec![]);
        };

        let scanner = DirectiveScanner::new()?;
        let mut branches = vec![];

        if let Some(body) = pr_body {
            let found = scanner.scan(body)?;
            trace!("PR #{pr_number} body requests {found:?}");
            branches.extend(found);
        }

        let comments = store
            .list_comments(owner, repo, pr_number)
            .await
            .context(format!("listing comments of {owner}/{repo}#{pr_number}"))?;

        for body in comments.iter().filter_map(|comment| comment.body.as_deref()) {
            branches.extend(scanner.scan(body)?);
        }

        let branches = dedup_first_seen(branches);

        if branches.is_empty() {
            diagnostics.info("No cherry-pick requests found - skipping backport");
            return Ok(vec![]);
        }

        diagnostics.info(&format!("Target branches: {}", branches.join(", ")));

        Ok(branches)
    }

    /// Hands the branches to the next workflow step.
    ///
    /// With an output file they are appended as `branches=<json>`, otherwise the JSON array is
    /// printed to stdout.
    pub fn publish_branches(branches: &[String], output_path: Option<&Path>) -> Result<()> {
        let json = serde_json::to_string(branches)?;

        if let Some(path) = output_path {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context(format!("opening {path:#?}"))?;
            writeln!(file, "branches={json}").context(format!("writing to {path:#?}"))?;
            debug!("wrote 'branches={json}' to {path:#?}");
        } else {
            println!("{json}");
        }

        Ok(())
    }

}
