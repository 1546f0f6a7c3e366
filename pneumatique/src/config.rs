use clap::Parser;

/// Deployment configuration, environment-driven. Parsed once at startup;
/// components receive the values they need through their constructors.
#[derive(Parser, Debug, Clone)]
pub struct Config {
    /// Table holding email records, projections and state sequences
    #[clap(long, env = "EMAIL_TABLE_NAME")]
    pub email_table_name: String,

    /// Base URL of the blob endpoints (`/download-iam`, `/delete-iam`,
    /// `/jmap-iam`)
    #[clap(long, env = "CORE_API_URL")]
    pub core_api_url: String,

    /// Queue receiving blob-deletion envelopes
    #[clap(long, env = "BLOB_DELETE_QUEUE_URL")]
    pub blob_delete_queue_url: String,

    /// Server-side ceiling for Email/get maxBodyValueBytes
    #[clap(long, env = "MAX_BODY_VALUE_BYTES", default_value_t = pneu_jmap::DEFAULT_MAX_BODY_VALUE_BYTES)]
    pub max_body_value_bytes: usize,

    /// Days a change-log row lives before expiring
    #[clap(long, env = "STATE_TTL_DAYS", default_value_t = pneu_store::state::DEFAULT_STATE_TTL_DAYS)]
    pub state_ttl_days: i64,

    /// Model used by the asynchronous summarizer; absent disables it
    #[clap(long, env = "SUMMARY_MODEL_ID")]
    pub summary_model_id: Option<String>,

    /// Serve the stored summary in place of the preview when present
    #[clap(long, env = "SUMMARY_OVERWRITES_PREVIEW", default_value_t = false)]
    pub summary_overwrites_preview: bool,
}
