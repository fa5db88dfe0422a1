//! Reasoning-service abstraction.
//!
//! The [`Reasoner`] trait decouples the step loop from the service that turns a prompt
//! into a structured answer. [`CommandReasoner`] runs a configured command once per
//! request; tests use scripted reasoners that return predetermined answers.

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Validator;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::types::{Decision, Intent};
use crate::io::config::ReasonerConfig;
use crate::io::process::{command_from_argv, run_command_with_timeout};
use crate::io::prompt::PromptPair;

const DECISION_SCHEMA: &str = include_str!("../../schemas/decision.schema.json");
const INTENT_SCHEMA: &str = include_str!("../../schemas/intent.schema.json");

/// Abstraction over reasoning backends.
///
/// Calls block until the service answers; there is no cancellation.
pub trait Reasoner {
    /// Next action for the current step.
    fn decide(&mut self, prompt: &PromptPair) -> Result<Decision>;

    /// Restated goal and plan.
    fn intent(&mut self, prompt: &PromptPair) -> Result<Intent>;
}

/// What a request asks for; tells the command which schema to answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum RequestKind {
    Decision,
    Intent,
}

#[derive(Debug, Serialize)]
struct ReasonerRequest<'a> {
    kind: RequestKind,
    system: &'a str,
    user: &'a str,
    schema: &'a Value,
}

/// Compiled output contract for one request kind.
struct OutputContract {
    schema: Value,
    validator: Validator,
}

impl OutputContract {
    fn compile(raw: &str) -> Result<Self> {
        let schema: Value = serde_json::from_str(raw).context("parse output schema")?;
        let validator =
            jsonschema::validator_for(&schema).map_err(|err| anyhow!("invalid schema: {err}"))?;
        Ok(Self { schema, validator })
    }

    fn check(&self, answer: &Value) -> Result<()> {
        let messages: Vec<String> = self
            .validator
            .iter_errors(answer)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            bail!("reasoner answer failed schema validation: {}", messages.join("; "));
        }
        Ok(())
    }
}

/// Reasoner that spawns the configured command per request.
///
/// The command receives `{"kind", "system", "user", "schema"}` as JSON on stdin and must
/// print one JSON object matching `schema` on stdout.
pub struct CommandReasoner {
    config: ReasonerConfig,
    decision: OutputContract,
    intent: OutputContract,
}

impl CommandReasoner {
    pub fn new(config: ReasonerConfig) -> Result<Self> {
        Ok(Self {
            config,
            decision: OutputContract::compile(DECISION_SCHEMA).context("decision schema")?,
            intent: OutputContract::compile(INTENT_SCHEMA).context("intent schema")?,
        })
    }

    #[instrument(skip_all, fields(kind = ?kind))]
    fn request<T: DeserializeOwned>(&self, kind: RequestKind, prompt: &PromptPair) -> Result<T> {
        let contract = match kind {
            RequestKind::Decision => &self.decision,
            RequestKind::Intent => &self.intent,
        };
        let request = serde_json::to_vec(&ReasonerRequest {
            kind,
            system: &prompt.system,
            user: &prompt.user,
            schema: &contract.schema,
        })
        .context("serialize reasoner request")?;

        let cmd = command_from_argv(&self.config.command).context("reasoner.command")?;
        let output = run_command_with_timeout(
            cmd,
            Some(&request),
            self.config.timeout(),
            self.config.output_limit_bytes,
        )
        .context("run reasoner")?;
        let stdout = output.into_success_stdout("reasoner")?;
        debug!(bytes = stdout.len(), "reasoner answered");

        parse_answer(contract, &stdout)
    }
}

fn parse_answer<T: DeserializeOwned>(contract: &OutputContract, stdout: &str) -> Result<T> {
    let answer: Value =
        serde_json::from_str(stdout.trim()).context("parse reasoner answer as json")?;
    contract.check(&answer)?;
    serde_json::from_value(answer).context("deserialize reasoner answer")
}

impl Reasoner for CommandReasoner {
    fn decide(&mut self, prompt: &PromptPair) -> Result<Decision> {
        self.request(RequestKind::Decision, prompt)
    }

    fn intent(&mut self, prompt: &PromptPair) -> Result<Intent> {
        self.request(RequestKind::Intent, prompt)
    }
}
