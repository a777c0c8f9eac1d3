// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session configuration derived from the judge-adapter payload of a work item.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Environment variable carrying the solution artifact URL into the job.
pub const SOLUTION_URL_VAR: &str = "SOLUTION_URL";

/// Errors building the judge job from its template.
#[derive(Debug, Error)]
pub enum JobTemplateError {
    /// The judge config has no `jobTemplate`.
    #[error("job template is missing")]
    Missing,

    /// The template is present but not an object.
    #[error("job template must be an object")]
    NotAnObject,
}

/// Workload template plus template variables, parsed once per session.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningConfig {
    /// Job manifest to instantiate, as JSON.
    #[serde(default)]
    pub job_template: Option<Value>,
    /// Variables exposed to the environment templates.
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl RunningConfig {
    /// Parse the adapter payload. A null payload yields an empty config.
    pub fn from_judge_config(config: &Value) -> Result<Self, serde_json::Error> {
        if config.is_null() {
            return Ok(Self::default());
        }
        Self::deserialize(config)
    }

    /// Instantiate the judge job inside `namespace`.
    ///
    /// Every container gets `SOLUTION_URL` set to `solution_url`, replacing
    /// any entry of that name the template already carries.
    pub fn build_job(
        &self,
        namespace: &str,
        name: &str,
        solution_url: &str,
    ) -> Result<Value, JobTemplateError> {
        let mut job = self.job_template.clone().ok_or(JobTemplateError::Missing)?;
        let root = job.as_object_mut().ok_or(JobTemplateError::NotAnObject)?;

        let metadata = root
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !metadata.is_object() {
            *metadata = Value::Object(Map::new());
        }
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("namespace".to_string(), json!(namespace));
            metadata.insert("name".to_string(), json!(name));
        }

        let containers = job
            .pointer_mut("/spec/template/spec/containers")
            .and_then(Value::as_array_mut);
        for container in containers.into_iter().flatten() {
            inject_env(container, SOLUTION_URL_VAR, solution_url);
        }

        Ok(job)
    }
}

fn inject_env(container: &mut Value, var: &str, value: &str) {
    let Some(container) = container.as_object_mut() else {
        return;
    };
    let env = container
        .entry("env")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !env.is_array() {
        *env = Value::Array(Vec::new());
    }
    if let Some(env) = env.as_array_mut() {
        env.retain(|entry| entry.get("name").and_then(Value::as_str) != Some(var));
        env.push(json!({"name": var, "value": value}));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RunningConfig {
        RunningConfig::from_judge_config(&json!({
            "jobTemplate": {
                "apiVersion": "batch/v1",
                "kind": "Job",
                "metadata": {"name": "template", "labels": {"app": "judge"}},
                "spec": {"template": {"spec": {"containers": [
                    {"name": "runner", "image": "judge:1", "env": [
                        {"name": "SOLUTION_URL", "value": "stale"},
                        {"name": "MODE", "value": "fast"}
                    ]},
                    {"name": "sidecar", "image": "busybox"}
                ]}}}
            },
            "variables": {"cpu": "4"}
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_variables() {
        let cfg = config();
        assert_eq!(cfg.variables.get("cpu"), Some(&json!("4")));
        assert!(cfg.job_template.is_some());
    }

    #[test]
    fn test_null_payload_is_empty() {
        let cfg = RunningConfig::from_judge_config(&Value::Null).unwrap();
        assert_eq!(cfg, RunningConfig::default());
    }

    #[test]
    fn test_build_job_sets_identity_and_solution_url() {
        let job = config().build_job("j-t1", "judge", "https://oss/s1").unwrap();

        assert_eq!(job["metadata"]["name"], "judge");
        assert_eq!(job["metadata"]["namespace"], "j-t1");
        assert_eq!(job["metadata"]["labels"]["app"], "judge");

        let runner_env = job["spec"]["template"]["spec"]["containers"][0]["env"]
            .as_array()
            .unwrap();
        assert_eq!(runner_env.len(), 2);
        assert_eq!(runner_env[0]["name"], "MODE");
        assert_eq!(runner_env[1], json!({"name": "SOLUTION_URL", "value": "https://oss/s1"}));

        let sidecar_env = &job["spec"]["template"]["spec"]["containers"][1]["env"];
        assert_eq!(
            sidecar_env,
            &json!([{"name": "SOLUTION_URL", "value": "https://oss/s1"}])
        );
    }

    #[test]
    fn test_missing_template() {
        let cfg = RunningConfig::from_judge_config(&json!({"variables": {}})).unwrap();
        assert!(matches!(
            cfg.build_job("j-t1", "judge", "u"),
            Err(JobTemplateError::Missing)
        ));
    }

    #[test]
    fn test_template_must_be_object() {
        let cfg = RunningConfig {
            job_template: Some(json!("kind: Job")),
            ..RunningConfig::default()
        };
        assert!(matches!(
            cfg.build_job("j-t1", "judge", "u"),
            Err(JobTemplateError::NotAnObject)
        ));
    }
}
