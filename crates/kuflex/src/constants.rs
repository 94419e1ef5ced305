pub const KUFLEX_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const LOG_FILE_NAME: &str = "kuflex.log";

pub const LINK_NAMESPACE: &str = "cluster-registry";

pub const VERIFY_INTERVAL_MS: u64 = 150;
pub const VERIFY_TIMEOUT_SECS: u64 = 60;

pub const MIRROR_ATTEMPTS: u32 = 4;
pub const MIRROR_INTERVAL_MS: u64 = 1000;

pub const ISTIO_OPERATOR_REPOSITORY_URL: &str = "https://kubernetes-charts.banzaicloud.com";
pub const ISTIO_OPERATOR_REPOSITORY: &str = "banzaicloud-stable";
pub const ISTIO_OPERATOR_CHART: &str = "istio-operator";
pub const ISTIO_OPERATOR_RELEASE: &str = "banzaicloud-stable";
pub const ISTIO_OPERATOR_NAMESPACE: &str = "istio-system";
pub const ISTIO_OPERATOR_DEPLOYMENT: &str = "banzaicloud-stable-istio-operator";

pub const CLUSTER_REGISTRY_REPOSITORY_URL: &str = "https://cisco-open.github.io/cluster-registry-controller";
pub const CLUSTER_REGISTRY_REPOSITORY: &str = "cluster-registry";
pub const CLUSTER_REGISTRY_CHART: &str = "cluster-registry";
pub const CLUSTER_REGISTRY_RELEASE: &str = "cluster-registry";
pub const CLUSTER_REGISTRY_NAMESPACE: &str = "cluster-registry";
pub const CLUSTER_REGISTRY_DEPLOYMENT: &str = "cluster-registry-controller";
