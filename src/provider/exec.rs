use crate::runner;
use declarative::{Attributes, Provider, ProviderError, ProviderOutput, ProviderResult, ResourceId};
use serde::{Deserialize, Serialize};

/// Exit code a plugin uses to ask for a retry (`EX_TEMPFAIL`)
const EXIT_TEMPFAIL: i32 = 75;

/// Provider backed by an external program.
///
/// Each operation runs the program once with a JSON request on stdin and
/// expects one JSON response on stdout.
pub struct ExecProvider {
    command: String,
    args: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    operation: &'a str,
    #[serde(rename = "type")]
    resource_type: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attributes: Option<&'a Attributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous: Option<&'a Attributes>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Response {
    Failure {
        error: String,
        #[serde(default)]
        transient: bool,
    },
    Success(ProviderOutput),
}

impl ExecProvider {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    fn call(&self, request: &Request<'_>) -> ProviderResult<Option<ProviderOutput>> {
        let input = serde_json::to_vec(request)
            .map_err(|e| ProviderError::permanent(format!("could not encode request: {e}")))?;
        log::trace!("exec {}: {}", self.command, String::from_utf8_lossy(&input));

        let output = runner::run_with_input(&self.command, &self.args, &input)
            .map_err(|e| ProviderError::permanent(format!("{e:#}")))?;

        if !output.success {
            let message = if output.stderr.is_empty() {
                format!("{} exited with {:?}", self.command, output.code)
            } else {
                output.stderr
            };
            return Err(if output.code == Some(EXIT_TEMPFAIL) {
                ProviderError::transient(message)
            } else {
                ProviderError::permanent(message)
            });
        }

        if output.stdout.is_empty() {
            return Ok(None);
        }
        match serde_json::from_str::<Response>(&output.stdout) {
            Ok(Response::Success(out)) => Ok(Some(out)),
            Ok(Response::Failure { error, transient }) => Err(ProviderError { message: error, transient }),
            Err(e) => Err(ProviderError::permanent(format!(
                "invalid response from {}: {e}",
                self.command
            ))),
        }
    }

    fn expect_output(&self, response: Option<ProviderOutput>) -> ProviderResult<ProviderOutput> {
        response.ok_or_else(|| ProviderError::permanent(format!("{} returned no output", self.command)))
    }
}

impl Provider for ExecProvider {
    fn create(&self, resource: &ResourceId, attributes: &Attributes) -> ProviderResult<ProviderOutput> {
        let response = self.call(&Request {
            operation: "create",
            resource_type: &resource.resource_type,
            name: &resource.name,
            id: None,
            attributes: Some(attributes),
            previous: None,
        })?;
        self.expect_output(response)
    }

    fn update(
        &self,
        resource: &ResourceId,
        id: &str,
        previous: &Attributes,
        attributes: &Attributes,
    ) -> ProviderResult<ProviderOutput> {
        let response = self.call(&Request {
            operation: "update",
            resource_type: &resource.resource_type,
            name: &resource.name,
            id: Some(id),
            attributes: Some(attributes),
            previous: Some(previous),
        })?;
        self.expect_output(response)
    }

    fn destroy(&self, resource: &ResourceId, id: &str) -> ProviderResult<()> {
        self.call(&Request {
            operation: "destroy",
            resource_type: &resource.resource_type,
            name: &resource.name,
            id: Some(id),
            attributes: None,
            previous: None,
        })?;
        Ok(())
    }
}
