//! Rendering of the installation payload.
//!
//! The payload is one bash script with two embedded layers:
//!
//! - the kind cluster topology (`kind-config.yaml`)
//! - the runtime-access script left on the machine (`cluster-urls.sh`)
//!
//! Each layer is rendered from [`PayloadParams`] exactly once. The inner
//! layers are then handed to the outer template as opaque values, and the
//! outer script writes them out through quoted heredocs, so neither this crate
//! nor the remote shell expands their contents a second time.

use serde::Serialize;

use crate::config::FleetConfig;
use crate::error::Result;
use crate::paths;
use crate::request::ProvisionRequest;
use crate::template::{Template, Vars};

pub const GRAFANA_NODE_PORT: u16 = 30080;
pub const PROMETHEUS_NODE_PORT: u16 = 30090;
pub const API_SERVER_PORT: u16 = 6443;

/// The fully rendered script delivered to every machine in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadArtifact {
    body: String,
}

impl PayloadArtifact {
    pub fn new(body: String) -> Self {
        Self { body }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_string(self) -> String {
        self.body
    }
}

/// Typed inputs for every payload layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadParams {
    pub cluster_name: String,
    pub kind_version: String,
    pub kubectl_version: String,
    pub helm_version: String,
    pub calico_version: String,
    pub node_image: String,
}

impl From<&ProvisionRequest> for PayloadParams {
    fn from(req: &ProvisionRequest) -> Self {
        Self {
            cluster_name: req.prefix.clone(),
            kind_version: req.stack.kind_version.clone(),
            kubectl_version: req.stack.kubectl_version.clone(),
            helm_version: req.stack.helm_version.clone(),
            calico_version: req.stack.calico_version.clone(),
            node_image: req.stack.node_image.clone(),
        }
    }
}

impl From<&FleetConfig> for PayloadParams {
    fn from(cfg: &FleetConfig) -> Self {
        Self {
            cluster_name: cfg.machine.prefix.clone(),
            kind_version: cfg.stack.kind_version.clone(),
            kubectl_version: cfg.stack.kubectl_version.clone(),
            helm_version: cfg.stack.helm_version.clone(),
            calico_version: cfg.stack.calico_version.clone(),
            node_image: cfg.stack.node_image.clone(),
        }
    }
}

pub fn render(request: &ProvisionRequest) -> Result<PayloadArtifact> {
    render_params(&PayloadParams::from(request))
}

pub fn render_params(params: &PayloadParams) -> Result<PayloadArtifact> {
    let kind_config = KIND_CONFIG.render(
        &Vars::new()
            .set("cluster_name", &params.cluster_name)
            .set("node_image", &params.node_image)
            .set("api_server_port", API_SERVER_PORT.to_string())
            .set("grafana_port", GRAFANA_NODE_PORT.to_string())
            .set("prometheus_port", PROMETHEUS_NODE_PORT.to_string()),
    )?;

    let access_script = ACCESS_SCRIPT.render(
        &Vars::new()
            .set("cluster_name", &params.cluster_name)
            .set("api_server_port", API_SERVER_PORT.to_string())
            .set("grafana_port", GRAFANA_NODE_PORT.to_string())
            .set("prometheus_port", PROMETHEUS_NODE_PORT.to_string()),
    )?;

    let body = INSTALL_SCRIPT.render(
        &Vars::new()
            .set("cluster_name", &params.cluster_name)
            .set("kind_version", &params.kind_version)
            .set("kubectl_version", &params.kubectl_version)
            .set("helm_version", &params.helm_version)
            .set("calico_version", &params.calico_version)
            .set("grafana_port", GRAFANA_NODE_PORT.to_string())
            .set("prometheus_port", PROMETHEUS_NODE_PORT.to_string())
            .set("access_script_name", paths::REMOTE_ACCESS_SCRIPT)
            .set("kind_config", kind_config.trim_end())
            .set("access_script", access_script.trim_end()),
    )?;

    Ok(PayloadArtifact::new(body))
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

const KIND_CONFIG: Template = Template::new(
    "kind-config",
    r#"kind: Cluster
apiVersion: kind.x-k8s.io/v1alpha4
name: {{cluster_name}}
networking:
  apiServerAddress: "0.0.0.0"
  apiServerPort: {{api_server_port}}
  disableDefaultCNI: true
  podSubnet: "192.168.0.0/16"
nodes:
  - role: control-plane
    image: {{node_image}}
    extraPortMappings:
      - containerPort: {{grafana_port}}
        hostPort: {{grafana_port}}
        protocol: TCP
      - containerPort: {{prometheus_port}}
        hostPort: {{prometheus_port}}
        protocol: TCP
  - role: worker
    image: {{node_image}}
"#,
);

const ACCESS_SCRIPT: Template = Template::new(
    "cluster-urls",
    r#"#!/usr/bin/env bash
# Print externally reachable URLs for the services installed on this machine.
set -euo pipefail

METADATA_URL="http://metadata.google.internal/computeMetadata/v1/instance/network-interfaces/0/access-configs/0/external-ip"
EXTERNAL_IP="$(curl -fsS -H 'Metadata-Flavor: Google' "$METADATA_URL")"

GRAFANA_PASSWORD="$(kubectl get secret -n monitoring kube-prometheus-stack-grafana \
  -o jsonpath='{.data.admin-password}' 2>/dev/null | base64 -d || echo '<unavailable>')"

echo "Cluster:     {{cluster_name}} on $(hostname)"
echo "API server:  https://${EXTERNAL_IP}:{{api_server_port}}"
echo "Grafana:     http://${EXTERNAL_IP}:{{grafana_port}}  (admin / ${GRAFANA_PASSWORD})"
echo "Prometheus:  http://${EXTERNAL_IP}:{{prometheus_port}}"
"#,
);

const INSTALL_SCRIPT: Template = Template::new(
    "install",
    r#"#!/usr/bin/env bash
# fleet installation payload for cluster '{{cluster_name}}'.
set -euo pipefail
export DEBIAN_FRONTEND=noninteractive

KIND_VERSION="{{kind_version}}"
KUBECTL_VERSION="{{kubectl_version}}"
HELM_VERSION="{{helm_version}}"
CALICO_VERSION="{{calico_version}}"
FLEET_DIR="$HOME/.fleet"

log() { echo "[fleet] $*"; }

log "installing container runtime"
sudo apt-get update -y
sudo apt-get install -y docker.io curl ca-certificates
sudo systemctl enable --now docker
sudo usermod -aG docker "$USER"

log "installing kind ${KIND_VERSION}"
curl -fsSLo /tmp/kind "https://kind.sigs.k8s.io/dl/${KIND_VERSION}/kind-linux-amd64"
sudo install -m 0755 /tmp/kind /usr/local/bin/kind

log "installing kubectl ${KUBECTL_VERSION}"
curl -fsSLo /tmp/kubectl "https://dl.k8s.io/release/${KUBECTL_VERSION}/bin/linux/amd64/kubectl"
sudo install -m 0755 /tmp/kubectl /usr/local/bin/kubectl

log "installing helm ${HELM_VERSION}"
curl -fsSL "https://get.helm.sh/helm-${HELM_VERSION}-linux-amd64.tar.gz" | tar -xz -C /tmp
sudo install -m 0755 /tmp/linux-amd64/helm /usr/local/bin/helm

mkdir -p "$FLEET_DIR" "$HOME/.kube"
cat > "$FLEET_DIR/kind-config.yaml" <<'FLEET_KIND_CONFIG'
{{kind_config}}
FLEET_KIND_CONFIG

if sudo kind get clusters | grep -qx "{{cluster_name}}"; then
  log "cluster {{cluster_name}} already exists"
else
  log "creating cluster {{cluster_name}}"
  sudo kind create cluster --config "$FLEET_DIR/kind-config.yaml" --wait 120s
fi
sudo kind get kubeconfig --name "{{cluster_name}}" > "$HOME/.kube/config"
chmod 600 "$HOME/.kube/config"

log "installing calico ${CALICO_VERSION}"
kubectl apply -f "https://raw.githubusercontent.com/projectcalico/calico/${CALICO_VERSION}/manifests/calico.yaml"
kubectl wait --for=condition=Ready nodes --all --timeout=300s

log "installing monitoring stack"
helm repo add prometheus-community https://prometheus-community.github.io/helm-charts --force-update
helm upgrade --install kube-prometheus-stack prometheus-community/kube-prometheus-stack \
  --namespace monitoring --create-namespace \
  --set grafana.service.type=NodePort \
  --set grafana.service.nodePort={{grafana_port}} \
  --set prometheus.service.type=NodePort \
  --set prometheus.service.nodePort={{prometheus_port}} \
  --wait --timeout 10m

cat > "$HOME/{{access_script_name}}" <<'FLEET_ACCESS_SCRIPT'
{{access_script}}
FLEET_ACCESS_SCRIPT
chmod +x "$HOME/{{access_script_name}}"

log "done"
"$HOME/{{access_script_name}}"
"#,
);
