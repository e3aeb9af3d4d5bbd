//! Template Renderer: values in, ordered object list out.
//!
//! The bundle is embedded at compile time and rendered with minijinja. Each
//! rendered file may hold several YAML documents. Empty documents and the
//! notes file are skipped.

use kube::ResourceExt;
use kube::api::DynamicObject;
use minijinja::{AutoEscape, Environment, ErrorKind, UndefinedBehavior, Value};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::capabilities::Capabilities;
use crate::config::OperatorConfig;
use crate::crd::MLflow;
use crate::error::Error;
use crate::object::RenderedObject;
use crate::values::{Values, mlflow_to_values};

pub const NOTES_TEMPLATE: &str = "NOTES.txt";

/// Render order is bundle order.
pub const BUNDLE: &[(&str, &str)] = &[
    ("serviceaccount.yaml", include_str!("../templates/serviceaccount.yaml")),
    ("clusterrole.yaml", include_str!("../templates/clusterrole.yaml")),
    ("clusterrolebinding.yaml", include_str!("../templates/clusterrolebinding.yaml")),
    ("pvc.yaml", include_str!("../templates/pvc.yaml")),
    ("service.yaml", include_str!("../templates/service.yaml")),
    ("networkpolicy.yaml", include_str!("../templates/networkpolicy.yaml")),
    ("deployment.yaml", include_str!("../templates/deployment.yaml")),
    (NOTES_TEMPLATE, include_str!("../templates/NOTES.txt")),
];

/// Cluster facts that feed rendering but are not part of `MLflowSpec`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    pub platform_ca_bundle_exists: bool,
}

pub struct Renderer {
    env: Environment<'static>,
    order: Vec<&'static str>,
}

impl Renderer {
    pub fn new() -> Result<Self, Error> {
        Self::from_bundle(BUNDLE)
    }

    pub fn from_bundle(bundle: &[(&'static str, &'static str)]) -> Result<Self, Error> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        // Values are emitted through `json` where quoting matters.
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.add_filter("json", json_filter);

        let mut order = Vec::with_capacity(bundle.len());
        for &(name, source) in bundle {
            env.add_template(name, source)
                .map_err(|source| Error::Template {
                    template: name.to_string(),
                    source,
                })?;
            order.push(name);
        }

        Ok(Self { env, order })
    }

    #[instrument(skip_all, fields(name = %mlflow.name_any(), namespace = %namespace))]
    pub fn render(
        &self,
        mlflow: &MLflow,
        namespace: &str,
        config: &OperatorConfig,
        capabilities: &Capabilities,
        options: &RenderOptions,
    ) -> Result<Vec<RenderedObject>, Error> {
        let values = mlflow_to_values(mlflow, namespace, config, capabilities, options)?;
        self.render_values(&values)
    }

    pub fn render_values(&self, values: &Values) -> Result<Vec<RenderedObject>, Error> {
        let ctx = Value::from_serialize(values);
        let mut objects = Vec::new();

        for name in &self.order {
            if *name == NOTES_TEMPLATE {
                continue;
            }
            let text = self
                .env
                .get_template(name)
                .and_then(|t| t.render(&ctx))
                .map_err(|source| Error::Template {
                    template: name.to_string(),
                    source,
                })?;
            let parsed = parse_documents(name, &text)?;
            debug!(template = name, objects = parsed.len(), "rendered");
            objects.extend(parsed);
        }

        Ok(objects)
    }
}

fn json_filter(value: Value) -> Result<String, minijinja::Error> {
    serde_json::to_string(&value).map_err(|e| {
        minijinja::Error::new(ErrorKind::InvalidOperation, "value is not serializable")
            .with_source(e)
    })
}

/// Split rendered text into YAML documents and decode each into an object.
pub fn parse_documents(template: &str, text: &str) -> Result<Vec<RenderedObject>, Error> {
    if is_blank(text) {
        return Ok(Vec::new());
    }

    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_json::Value::deserialize(document).map_err(|source| Error::Decode {
            template: template.to_string(),
            source,
        })?;

        match &value {
            serde_json::Value::Null => continue,
            serde_json::Value::Object(map) if map.is_empty() => continue,
            serde_json::Value::Object(_) => {}
            other => {
                return Err(Error::InvalidObject {
                    template: template.to_string(),
                    reason: format!("expected a mapping, found {other}"),
                });
            }
        }

        let object: DynamicObject =
            serde_json::from_value(value).map_err(|e| Error::InvalidObject {
                template: template.to_string(),
                reason: e.to_string(),
            })?;
        objects.push(validate(template, RenderedObject::new(object))?);
    }
    Ok(objects)
}

fn validate(template: &str, object: RenderedObject) -> Result<RenderedObject, Error> {
    let reason = if object.api_version().is_empty() {
        "missing apiVersion"
    } else if object.kind().is_empty() {
        "missing kind"
    } else if object.as_dynamic().metadata.name.as_deref().unwrap_or_default().is_empty() {
        "missing metadata.name"
    } else {
        return Ok(object);
    };
    Err(Error::InvalidObject {
        template: template.to_string(),
        reason: reason.to_string(),
    })
}

fn is_blank(text: &str) -> bool {
    text.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#') || line == "---"
    })
}
