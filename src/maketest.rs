use crate::rules::{RunRules, NO_MAX_DURATION};
use crate::template::{RenderError, TemplateRenderer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Locations needed to build, run and analyse a test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Directory containing the ROS graph generator
    pub generate_directory: String,
    /// Directory containing the ROS workspace
    pub workspace_directory: String,
    /// Directory containing the ROS installation
    pub ros_directory: String,
    /// Directory containing the analysis program
    pub analysis_directory: String,
    /// Directory in which results are placed
    pub results_directory: String,
    /// Directory in which logs are placed
    pub logfile_directory: String,
    /// Name of the logfile to analyse
    pub logfile_name: String,
}

/// Everything the script template sees for a single test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRecord {
    pub test_name: String,
    pub app_name: String,
    pub app_rules: String,
    pub is_custom_timing: bool,
    pub app_timing: String,
    pub is_duration: bool,
    pub duration_s: i64,
    #[serde(flatten)]
    pub environment: Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Rules,
    Timing,
    Template,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Rules => write!(f, "rules"),
            Stage::Timing => write!(f, "timing"),
            Stage::Template => write!(f, "template"),
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("unable to marshal rules")]
    Rules(#[source] serde_json::Error),
    #[error("unable to marshal timing")]
    Timing(#[source] serde_json::Error),
    #[error("unable to generate test script {}", destination.display())]
    Template {
        destination: PathBuf,
        #[source]
        source: RenderError,
    },
}

impl GenerateError {
    /// Which step of script generation failed.
    pub fn stage(&self) -> Stage {
        match self {
            GenerateError::Rules(_) => Stage::Rules,
            GenerateError::Timing(_) => Stage::Timing,
            GenerateError::Template { .. } => Stage::Template,
        }
    }
}

/// Whether a maximum duration is set, and the `timeout` value in seconds.
///
/// The seconds value is whole seconds plus one second of padding. It is
/// computed for every input, the `-1` sentinel included (giving `1`), and
/// negative values other than the sentinel go through the same formula.
pub fn duration_seconds(max_duration_us: i64) -> (bool, i64) {
    (max_duration_us != NO_MAX_DURATION, 1 + max_duration_us / 1_000_000)
}

/// Destination of the script for test `name`.
///
/// The name is appended to the output directory rather than joined, so an
/// absolute name still lands under `output_path`.
pub fn script_path(output_path: &Path, name: &str) -> PathBuf {
    let mut path = output_path.as_os_str().to_owned();
    path.push("/");
    path.push(name);
    path.push(".sh");
    PathBuf::from(path)
}

/// Assemble the template record for a test run.
///
/// Timing is only serialized when `is_custom_timing` is set; otherwise
/// `app_timing` stays empty and `timing` is never touched.
pub fn build_record<R, T>(
    name: &str,
    rules: &R,
    is_custom_timing: bool,
    timing: &[T],
    environment: &Environment,
) -> Result<TestRecord, GenerateError>
where
    R: RunRules,
    T: Serialize,
{
    let app_rules = serde_json::to_string(rules).map_err(GenerateError::Rules)?;

    let app_timing = if is_custom_timing {
        serde_json::to_string(timing).map_err(GenerateError::Timing)?
    } else {
        String::new()
    };

    let (is_duration, duration_s) = duration_seconds(rules.max_duration_us());

    Ok(TestRecord {
        test_name: name.to_string(),
        app_name: rules.name().to_string(),
        app_rules,
        is_custom_timing,
        app_timing,
        is_duration,
        duration_s,
        environment: environment.clone(),
    })
}

/// Produces `<output>/<name>.sh` run scripts from a fixed template.
pub struct ScriptGenerator<R> {
    template_path: PathBuf,
    renderer: R,
}

impl<R: TemplateRenderer> ScriptGenerator<R> {
    pub fn new(template_path: impl Into<PathBuf>, renderer: R) -> Self {
        ScriptGenerator {
            template_path: template_path.into(),
            renderer,
        }
    }

    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    /// Generate the run script for one test and return its path.
    ///
    /// The output directory must already exist. On a template failure the
    /// destination may have been partially written.
    pub fn generate<Ru, T>(
        &self,
        name: &str,
        output_path: impl AsRef<Path>,
        rules: &Ru,
        is_custom_timing: bool,
        timing: &[T],
        environment: &Environment,
    ) -> Result<PathBuf, GenerateError>
    where
        Ru: RunRules,
        T: Serialize,
    {
        let record = build_record(name, rules, is_custom_timing, timing, environment)?;
        let destination = script_path(output_path.as_ref(), name);

        tracing::debug!(
            "rendering test {} (app {}, custom timing {}, duration {:?})",
            record.test_name,
            record.app_name,
            record.is_custom_timing,
            record.is_duration.then_some(record.duration_s)
        );

        self.renderer
            .render(&record, &self.template_path, &destination)
            .map_err(|source| GenerateError::Template {
                destination: destination.clone(),
                source,
            })?;

        Ok(destination)
    }
}
