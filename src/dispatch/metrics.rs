use std::collections::BTreeMap;
use std::fmt::Write;
use crate::queue::QueueStats;
use crate::supervisor::{InstanceSnapshot, InstanceState};

/// Render fleet metrics in the Prometheus text exposition format.
pub fn render(
    queue: &QueueStats,
    instances: &[InstanceSnapshot],
    results_recorded: Option<u64>,
    dead_letter_alert: usize,
) -> String {
    let mut out = String::new();

    gauge(&mut out, "fleetd_queue_pending", "Jobs waiting to be leased", queue.pending as u64);
    gauge(&mut out, "fleetd_queue_leased", "Jobs currently leased to workers", queue.leased as u64);
    gauge(&mut out, "fleetd_queue_depth", "Jobs pending or leased", queue.depth() as u64);
    gauge(&mut out, "fleetd_dead_letter_jobs", "Jobs awaiting manual handling", queue.dead_letter as u64);
    gauge(
        &mut out,
        "fleetd_dead_letter_alert",
        "1 when dead letters exceed the alert threshold",
        u64::from(queue.dead_letter > dead_letter_alert),
    );
    counter(&mut out, "fleetd_jobs_enqueued_total", "Jobs accepted into the queue", queue.enqueued_total);
    counter(&mut out, "fleetd_jobs_requeued_total", "Expired leases returned to the queue", queue.requeued_total);
    counter(&mut out, "fleetd_jobs_dead_lettered_total", "Jobs moved to the dead-letter set", queue.dead_lettered_total);
    counter(&mut out, "fleetd_jobs_completed_total", "Jobs completed since start", queue.completed_total);
    if let Some(count) = results_recorded {
        gauge(&mut out, "fleetd_results_recorded", "Entries in the result manifest", count);
    }

    let mut restarts: BTreeMap<&str, u64> = BTreeMap::new();
    let mut states: BTreeMap<(&str, &'static str), u64> = BTreeMap::new();
    for inst in instances {
        *restarts.entry(inst.agent_id.as_str()).or_default() += inst.restarts;
        for state in InstanceState::ALL {
            states.entry((inst.agent_id.as_str(), state.as_str())).or_default();
        }
        *states.entry((inst.agent_id.as_str(), inst.state.as_str())).or_default() += 1;
    }

    header(&mut out, "fleetd_agent_restarts_total", "Automatic and manual restarts per agent", "counter");
    for (agent, count) in &restarts {
        let _ = writeln!(out, "fleetd_agent_restarts_total{{agent=\"{}\"}} {}", escape(agent), count);
    }

    header(&mut out, "fleetd_agent_instances", "Instances per agent and state", "gauge");
    for ((agent, state), count) in &states {
        let _ = writeln!(
            out,
            "fleetd_agent_instances{{agent=\"{}\",state=\"{}\"}} {}",
            escape(agent), state, count
        );
    }

    header(&mut out, "fleetd_instance_uptime_seconds", "Seconds since the instance entered running", "gauge");
    for inst in instances {
        let uptime = inst.uptime_secs.unwrap_or(0.0);
        let _ = writeln!(
            out,
            "fleetd_instance_uptime_seconds{{agent=\"{}\",index=\"{}\"}} {}",
            escape(&inst.agent_id), inst.index, uptime
        );
    }

    out
}

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
}

fn gauge(out: &mut String, name: &str, help: &str, value: u64) {
    header(out, name, help, "gauge");
    let _ = writeln!(out, "{} {}", name, value);
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    header(out, name, help, "counter");
    let _ = writeln!(out, "{} {}", name, value);
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(agent: &str, index: u32, state: InstanceState, restarts: u64) -> InstanceSnapshot {
        InstanceSnapshot {
            agent_id: agent.into(),
            index,
            state,
            pid: None,
            failure_count: 0,
            probe_failures: 0,
            restarts,
            restart_at: None,
            last_restart: None,
            last_health: None,
            running_since: None,
            uptime_secs: (state == InstanceState::Running).then_some(12.5),
            last_message: None,
        }
    }

    #[test]
    fn test_render_metrics() {
        let stats = QueueStats { pending: 4, leased: 2, dead_letter: 1, completed_total: 9, ..Default::default() };
        let instances = vec![
            instance("crawler", 0, InstanceState::Running, 2),
            instance("crawler", 1, InstanceState::Restarting, 3),
        ];
        let text = render(&stats, &instances, Some(9), 0);

        assert!(text.contains("fleetd_queue_depth 6\n"));
        assert!(text.contains("fleetd_dead_letter_jobs 1\n"));
        assert!(text.contains("fleetd_dead_letter_alert 1\n"));
        assert!(text.contains("fleetd_agent_restarts_total{agent=\"crawler\"} 5\n"));
        assert!(text.contains("fleetd_agent_instances{agent=\"crawler\",state=\"running\"} 1\n"));
        assert!(text.contains("fleetd_agent_instances{agent=\"crawler\",state=\"failed\"} 0\n"));
        assert!(text.contains("fleetd_instance_uptime_seconds{agent=\"crawler\",index=\"0\"} 12.5\n"));
        assert!(text.contains("# TYPE fleetd_jobs_completed_total counter\n"));
    }

    #[test]
    fn test_label_escaping() {
        assert_eq!(escape("a\"b"), "a\\\"b");
    }
}
