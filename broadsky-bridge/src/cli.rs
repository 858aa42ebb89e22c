use crate::{
    codec::Codec,
    conf::{
        BridgeTarget, DEFAULT_METRICS_LISTEN, DEFAULT_SUBJECT,
        normalize_repo_url,
    },
    error::BridgeError,
};

/// bridge Streaming Wire Protocol (v0) to zenoh and other protocols
#[derive(clap::Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct BroadskyCli {
    #[command(subcommand)]
    pub command: BroadskyCommands,
}

#[derive(clap::Subcommand, Clone, Debug)]
pub enum BroadskyCommands {
    /// Run a bridge
    #[clap(aliases = &["b"])]
    Bridge {
        #[clap(flatten)]
        input: InputArgs,
        #[command(subcommand)]
        protocol: BridgeProtocol,
    },
}

#[derive(clap::Args, Clone, Debug)]
pub struct InputArgs {
    /// Cursor for source repo
    #[arg(long, global = true, help_heading = "Input options")]
    pub cursor: Option<String>,
    /// Show messages in JSON (for debugging)
    #[arg(long, global = true)]
    pub debug: bool,
    /// Metrics HTTP endpoint /_metrics
    #[arg(long, global = true)]
    pub metrics: bool,
    /// Metrics host and port
    #[arg(long, global = true, default_value = DEFAULT_METRICS_LISTEN)]
    pub metrics_listen: String,
}

#[derive(clap::Subcommand, Clone, Debug)]
pub enum BridgeProtocol {
    /// Bridge to zenoh
    #[clap(aliases = &["z"])]
    Zenoh(ZenohArgs),
}

#[derive(clap::Args, Clone, Debug)]
pub struct ZenohArgs {
    /// Repo source, for example: wss://bsky.social
    pub repo: String,
    /// Zenoh endpoints to connect to, comma separated
    pub target: Option<String>,
    /// Base subject, commits go to `<subject>.commit`
    pub subject: Option<String>,
    /// Specify output codec: cbor, json
    #[arg(long, default_value = "cbor")]
    pub codec: Codec,
}

impl InputArgs {
    pub fn metrics_listen(&self) -> Option<&str> {
        self.metrics.then_some(self.metrics_listen.as_str())
    }
}

impl ZenohArgs {
    pub fn to_target(
        &self,
        input: &InputArgs,
    ) -> Result<BridgeTarget, BridgeError> {
        let repo_url = normalize_repo_url(&self.repo, input.cursor.as_deref())?;
        let sink = self
            .target
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| broadsky_zenoh::DEFAULT_CONNECT.to_string());
        let subject = self
            .subject
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
        Ok(BridgeTarget {
            repo_url,
            sink,
            subject,
            codec: self.codec,
            debug: input.debug,
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn parse(args: &[&str]) -> (InputArgs, ZenohArgs) {
        let cli = BroadskyCli::try_parse_from(args.iter().copied()).unwrap();
        match cli.command {
            BroadskyCommands::Bridge {
                input,
                protocol: BridgeProtocol::Zenoh(z),
            } => (input, z),
        }
    }

    #[test]
    fn defaults_fill_target() {
        let (input, z) = parse(&["broadsky", "bridge", "zenoh", "bsky.social"]);
        let target = z.to_target(&input).unwrap();
        assert_eq!(
            target.repo_url,
            "wss://bsky.social/xrpc/com.atproto.sync.subscribeRepos"
        );
        assert_eq!(target.sink, "tcp/127.0.0.1:7447");
        assert_eq!(target.subject, "broadsky.stream.test");
        assert_eq!(target.codec, Codec::Cbor);
        assert!(!target.debug);
        assert_eq!(input.metrics_listen(), None);
    }

    #[test]
    fn flags_after_subcommand_and_aliases() {
        let (input, z) = parse(&[
            "broadsky",
            "b",
            "z",
            "bsky.network",
            "tcp/10.0.0.5:7447",
            "fire.hose",
            "--codec",
            "json",
            "--cursor",
            "42",
            "--debug",
            "--metrics",
        ]);
        let target = z.to_target(&input).unwrap();
        assert_eq!(
            target.repo_url,
            "wss://bsky.network/xrpc/com.atproto.sync.subscribeRepos?cursor=42"
        );
        assert_eq!(target.sink, "tcp/10.0.0.5:7447");
        assert_eq!(target.commit_subject(), "fire.hose.commit");
        assert_eq!(target.codec, Codec::Json);
        assert!(target.debug);
        assert_eq!(input.metrics_listen(), Some("127.0.0.1:5212"));
    }

    #[test]
    fn unknown_codec_falls_back_to_cbor() {
        let (input, z) = parse(&[
            "broadsky", "bridge", "zenoh", "bsky.social", "--codec", "yaml",
        ]);
        assert_eq!(z.to_target(&input).unwrap().codec, Codec::Cbor);
    }

    #[test]
    fn repo_is_required() {
        assert!(BroadskyCli::try_parse_from(["broadsky", "bridge", "zenoh"])
            .is_err());
    }
}
