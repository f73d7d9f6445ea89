//! The default event registry.
//!
//! Covers the standard boot sequence of a Kubernetes node: instance
//! provisioning, kernel and network bring-up, cloud-init phases, container
//! runtime and kubelet startup, CNI initialization, and node/pod readiness.

use bootline_sources::{
    ClusterSource, CniLogSource, CommentRule, EventDescriptor, EventMatcher, FleetSource,
    ImdsSource, MatchSelector, SyslogSource,
};
use once_cell::sync::Lazy;
use regex::Regex;

macro_rules! pattern {
    ($name:ident, $re:literal) => {
        static $name: Lazy<Regex> =
            Lazy::new(|| Regex::new($re).expect("static pattern compiles"));
    };
}

pattern!(VM_INIT, r".*kernel: Linux version.*");
pattern!(NETWORK_START, r".*Reached target Network \(Pre\).*");
pattern!(NETWORK_READY, r".*Reached target Network\..*");
pattern!(CLOUD_INIT_INITIAL_START, r".*cloud-init: Cloud-init v.* running 'init'.*");
pattern!(CLOUD_INIT_CONFIG_START, r".*cloud-init: Cloud-init v.* running 'modules:config'.*");
pattern!(CLOUD_INIT_FINAL_START, r".*cloud-init: Cloud-init v.* running 'modules:final'.*");
pattern!(CLOUD_INIT_FINAL_FINISH, r".*cloud-init: Cloud-init v.* finished");
pattern!(CONTAINERD_START, r".*Starting containerd container runtime.*");
pattern!(CONTAINERD_INITIALIZED, r".*Started containerd container runtime.*");
pattern!(KUBELET_START, r".*Starting Kubernetes Kubelet.*");
pattern!(KUBELET_INITIALIZED, r".*Started kubelet.*");
pattern!(KUBELET_REGISTERED, r".*Successfully registered node.*");
pattern!(
    KUBE_PROXY_START,
    r".*CreateContainer within sandbox .*Name:kube-proxy.* returns container id.*"
);
pattern!(
    CNI_INIT_START,
    r".*CreateContainer within sandbox .*Name:aws-vpc-cni-init.* returns container id.*"
);
pattern!(
    CNI_POD_START,
    r".*CreateContainer within sandbox .*Name:aws-node.* returns container id.*"
);
pattern!(CNI_PLUGIN_INITIALIZED, r".*Successfully copied CNI plugin binary and config file.*");
pattern!(NODE_READY, r#".*event="NodeReady".*"#);
pattern!(
    APISERVER_THROTTLED,
    r".*Waited for .* due to client-side throttling, not priority and fairness, request: .*"
);

fn syslog(name: &str, metric: &str, pattern: &'static Regex) -> EventDescriptor {
    EventDescriptor::new(
        name,
        metric,
        SyslogSource::NAME,
        EventMatcher::Pattern(pattern.clone()),
    )
}

/// The default event set, in boot order.
///
/// `pod_namespace` scopes the pod-readiness pattern to one namespace so a
/// test pod can act as the terminal workload signal.
#[must_use]
pub fn default_events(pod_namespace: &str) -> Vec<EventDescriptor> {
    let pod_ready = Regex::new(&format!(
        r".*{}/.* Type:ContainerStarted.*",
        regex::escape(pod_namespace)
    ))
    .expect("escaped namespace keeps the pattern valid");
    vec![
        EventDescriptor::new(
            "Fleet Requested",
            "fleet_requested",
            FleetSource::NAME,
            EventMatcher::FleetRequest,
        ),
        EventDescriptor::new(
            "Instance Requested",
            "instance_requested",
            FleetSource::NAME,
            EventMatcher::InstanceLaunch,
        ),
        EventDescriptor::new(
            "Instance Pending",
            "instance_pending",
            ImdsSource::NAME,
            EventMatcher::MetadataPath(ImdsSource::PENDING_TIME.to_string()),
        ),
        syslog("VM Initialized", "vm_initialized", &VM_INIT),
        syslog("Network Start", "network_start", &NETWORK_START),
        syslog("Network Ready", "network_ready", &NETWORK_READY),
        syslog(
            "Cloud-Init Initial Start",
            "cloudinit_initial_start",
            &CLOUD_INIT_INITIAL_START,
        ),
        syslog(
            "Cloud-Init Config Start",
            "cloudinit_config_start",
            &CLOUD_INIT_CONFIG_START,
        ),
        syslog(
            "Cloud-Init Final Start",
            "cloudinit_final_start",
            &CLOUD_INIT_FINAL_START,
        ),
        syslog(
            "Cloud-Init Final Finish",
            "cloudinit_final_finish",
            &CLOUD_INIT_FINAL_FINISH,
        ),
        syslog("Containerd Start", "containerd_start", &CONTAINERD_START),
        syslog(
            "Containerd Initialized",
            "containerd_initialized",
            &CONTAINERD_INITIALIZED,
        ),
        syslog("Kubelet Start", "kubelet_start", &KUBELET_START),
        syslog("Kubelet Initialized", "kubelet_initialized", &KUBELET_INITIALIZED),
        syslog("Kubelet Registered", "kubelet_registered", &KUBELET_REGISTERED),
        syslog("Kube-Proxy Start", "kube_proxy_start", &KUBE_PROXY_START),
        syslog("VPC CNI Init Start", "vpc_cni_init_start", &CNI_INIT_START),
        syslog("AWS Node Start", "aws_node_start", &CNI_POD_START),
        EventDescriptor::new(
            "VPC CNI Plugin Initialized",
            "vpc_cni_plugin_initialized",
            CniLogSource::NAME,
            EventMatcher::Pattern(CNI_PLUGIN_INITIALIZED.clone()),
        ),
        EventDescriptor::new(
            "Pod Created",
            "pod_created",
            ClusterSource::NAME,
            EventMatcher::PodCreation,
        ),
        syslog(
            "Kube-APIServer Throttled",
            "kube_apiserver_throttled",
            &APISERVER_THROTTLED,
        )
        .with_selector(MatchSelector::All)
        .with_comment(CommentRule::MatchedLine),
        syslog("Node Ready", "node_ready", &NODE_READY).terminal(),
        EventDescriptor::new(
            "Pod Ready",
            "pod_ready",
            SyslogSource::NAME,
            EventMatcher::Pattern(pod_ready),
        )
        .terminal(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_and_metrics_are_unique() {
        let events = default_events("default");
        let names: HashSet<_> = events.iter().map(|e| e.name.as_str()).collect();
        let metrics: HashSet<_> = events.iter().map(|e| e.metric.as_str()).collect();
        assert_eq!(names.len(), events.len());
        assert_eq!(metrics.len(), events.len());
    }

    #[test]
    fn terminal_events_are_node_and_pod_ready() {
        let terminals: Vec<_> = default_events("default")
            .into_iter()
            .filter(|e| e.terminal)
            .map(|e| e.name)
            .collect();
        assert_eq!(terminals, vec!["Node Ready", "Pod Ready"]);
    }

    #[test]
    fn pod_ready_pattern_is_namespace_scoped() {
        let events = default_events("kit.sh");
        let pod_ready = events.iter().find(|e| e.name == "Pod Ready").unwrap();
        let EventMatcher::Pattern(re) = &pod_ready.matcher else {
            panic!("pod ready should be a log pattern");
        };
        assert!(re.is_match(r#"Mar  5 10:02:03 host kubelet: "SyncLoop" event for pod kit.sh/test-pod Type:ContainerStarted"#));
        assert!(!re.is_match(r#"Mar  5 10:02:03 host kubelet: "SyncLoop" event for pod other/test-pod Type:ContainerStarted"#));
    }

    #[test]
    fn boot_patterns_match_real_log_lines() {
        assert!(VM_INIT.is_match(
            "Mar  5 10:00:40 ip-10-0-0-42 kernel: Linux version 5.10.210-201.852.amzn2.x86_64"
        ));
        assert!(CONTAINERD_INITIALIZED.is_match(
            "Mar  5 10:01:02 ip-10-0-0-42 systemd: Started containerd container runtime."
        ));
        assert!(NODE_READY.is_match(
            r#"Mar  5 10:01:40 ip-10-0-0-42 kubelet: "Node became ready" event="NodeReady""#
        ));
        assert!(APISERVER_THROTTLED.is_match(
            "Mar  5 10:01:20 ip-10-0-0-42 kubelet: Waited for 1.08s due to client-side throttling, not priority and fairness, request: GET:https://10.0.0.1/api"
        ));
    }
}
