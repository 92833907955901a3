use std::collections::BTreeMap;

use kalypso_api::server::{LogLevel, ObservabilitySpec};
use tracing::warn;

const PROFILING_PREFIX: &str = "profiles.grafana.com";

pub fn cpu_scrape_annotation() -> String {
    format!("{PROFILING_PREFIX}/cpu.scrape")
}

pub fn memory_scrape_annotation() -> String {
    format!("{PROFILING_PREFIX}/memory.scrape")
}

pub fn service_name_annotation() -> String {
    format!("{PROFILING_PREFIX}/service_name")
}

/// Pod-template annotations owned by the profiling toggle; they are dropped
/// again once profiling is switched off.
pub fn managed_annotations() -> [String; 3] {
    [
        cpu_scrape_annotation(),
        memory_scrape_annotation(),
        service_name_annotation(),
    ]
}

/// What the observability block of a server turns into.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    /// Appended to the server arguments, logging first.
    pub args: Vec<String>,
    pub annotations: BTreeMap<String, String>,
    /// Scrape interval of the `ServiceMonitor`, when one is requested.
    pub scrape_interval: Option<String>,
    /// Requested settings that could not be applied.
    pub warnings: Vec<String>,
}

pub fn plan(server: &str, spec: Option<&ObservabilitySpec>) -> Plan {
    let mut plan = Plan::default();
    let spec = match spec {
        Some(spec) if spec.enabled => spec,
        _ => return plan,
    };

    if let Some(logging) = spec.logging.as_ref().filter(|logging| logging.enabled) {
        plan.args.push(log_flag(logging.level).into());
    }

    if let Some(tracing) = spec.tracing.as_ref().filter(|tracing| tracing.enabled) {
        match spec
            .collector_endpoint
            .as_deref()
            .filter(|endpoint| !endpoint.is_empty())
        {
            Some(endpoint) => plan.args.push(format!(
                "--trace-config=mode=opentelemetry,url={endpoint},rate={rate}",
                rate = tracing.sampling_rate,
            )),
            None => {
                warn!("tracing is enabled without a collector endpoint: {server}");
                plan.warnings
                    .push("tracing is enabled without a collector endpoint".into());
            }
        }
    }

    if let Some(profiling) = spec.profiling.as_ref().filter(|profiling| profiling.enabled) {
        let profiles = profiling.profiles.unwrap_or_default();
        if profiles.cpu {
            plan.annotations
                .insert(cpu_scrape_annotation(), "true".into());
        }
        if profiles.memory {
            plan.annotations
                .insert(memory_scrape_annotation(), "true".into());
        }
        plan.annotations
            .insert(service_name_annotation(), server.into());
    }

    if let Some(metrics) = spec
        .metrics
        .as_ref()
        .filter(|metrics| metrics.enabled && metrics.enable_service_monitor)
    {
        plan.scrape_interval = Some(metrics.interval.clone());
    }

    plan
}

const fn log_flag(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Verbose => "--log-verbose=1",
        LogLevel::Info => "--log-info=true",
        LogLevel::Warning => "--log-warning=true",
        LogLevel::Error => "--log-error=true",
    }
}

#[cfg(test)]
mod tests {
    use kalypso_api::server::{
        LoggingSpec, MetricsSpec, ProfileTypes, ProfilingSpec, TracingSpec,
    };

    use super::*;

    fn logging(level: LogLevel) -> ObservabilitySpec {
        ObservabilitySpec {
            enabled: true,
            logging: Some(LoggingSpec {
                enabled: true,
                level,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn log_level_maps_to_exactly_one_flag() {
        for (level, flag) in [
            (LogLevel::Verbose, "--log-verbose=1"),
            (LogLevel::Info, "--log-info=true"),
            (LogLevel::Warning, "--log-warning=true"),
            (LogLevel::Error, "--log-error=true"),
        ] {
            let plan = plan("resnet", Some(&logging(level)));
            assert_eq!(plan.args, [flag]);
        }
    }

    #[test]
    fn global_switch_gates_everything() {
        let mut spec = logging(LogLevel::Verbose);
        spec.enabled = false;
        spec.profiling = Some(ProfilingSpec {
            enabled: true,
            profiles: None,
        });
        assert_eq!(plan("resnet", Some(&spec)), Plan::default());
        assert_eq!(plan("resnet", None), Plan::default());
    }

    #[test]
    fn tracing_follows_logging() {
        let spec = ObservabilitySpec {
            enabled: true,
            collector_endpoint: Some("http://tempo:4317".into()),
            logging: Some(LoggingSpec::default()),
            tracing: Some(TracingSpec {
                enabled: true,
                sampling_rate: "0.5".into(),
            }),
            ..Default::default()
        };

        let plan = plan("resnet", Some(&spec));
        assert_eq!(
            plan.args,
            [
                "--log-info=true",
                "--trace-config=mode=opentelemetry,url=http://tempo:4317,rate=0.5",
            ],
        );
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn tracing_needs_a_collector() {
        let spec = ObservabilitySpec {
            enabled: true,
            tracing: Some(TracingSpec {
                enabled: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        let plan = plan("resnet", Some(&spec));
        assert!(plan.args.is_empty());
        assert_eq!(plan.warnings, ["tracing is enabled without a collector endpoint"]);
    }

    #[test]
    fn profiling_annotates_pods() {
        let mut spec = ObservabilitySpec {
            enabled: true,
            profiling: Some(ProfilingSpec {
                enabled: true,
                profiles: Some(ProfileTypes {
                    cpu: true,
                    memory: true,
                }),
            }),
            ..Default::default()
        };

        let annotations = plan("resnet", Some(&spec)).annotations;
        assert_eq!(annotations["profiles.grafana.com/cpu.scrape"], "true");
        assert_eq!(annotations["profiles.grafana.com/memory.scrape"], "true");
        assert_eq!(annotations["profiles.grafana.com/service_name"], "resnet");

        spec.profiling = Some(ProfilingSpec {
            enabled: true,
            profiles: Some(ProfileTypes {
                cpu: false,
                memory: true,
            }),
        });
        let annotations = plan("resnet", Some(&spec)).annotations;
        assert!(!annotations.contains_key("profiles.grafana.com/cpu.scrape"));
        assert_eq!(annotations.len(), 2);
    }

    #[test]
    fn service_monitor_needs_both_toggles() {
        let mut spec = ObservabilitySpec {
            enabled: true,
            metrics: Some(MetricsSpec {
                interval: "30s".into(),
                enable_service_monitor: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            plan("resnet", Some(&spec)).scrape_interval.as_deref(),
            Some("30s"),
        );

        spec.metrics = Some(MetricsSpec::default());
        assert!(plan("resnet", Some(&spec)).scrape_interval.is_none());
    }
}
