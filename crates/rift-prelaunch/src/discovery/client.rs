use std::{
    fs, io,
    path::{Path, PathBuf},
};

use http::Uri;
use snafu::{ResultExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

const TOKEN_FILE: &str = "token";
const NAMESPACE_FILE: &str = "namespace";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read service account file {path:?}"))]
    ReadServiceAccount { source: io::Error, path: PathBuf },

    #[snafu(display("failed to create Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("failed to build services request"))]
    BuildRequest { source: http::Error },

    #[snafu(display("failed to fetch services of namespace {namespace:?}"))]
    FetchServices {
        source: kube::Error,
        namespace: String,
    },
}

/// Credentials Kubernetes mounts into every pod.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceAccount {
    pub token: String,
    pub namespace: String,
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("token", &"<redacted>")
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl ServiceAccount {
    /// Reads the bearer token and namespace from a service account mount,
    /// usually `/var/run/secrets/kubernetes.io/serviceaccount`.
    pub fn load(directory: &Path) -> Result<Self> {
        Ok(Self {
            token: read_trimmed(&directory.join(TOKEN_FILE))?,
            namespace: read_trimmed(&directory.join(NAMESPACE_FILE))?,
        })
    }
}

fn read_trimmed(path: &Path) -> Result<String> {
    let contents = fs::read_to_string(path).context(ReadServiceAccountSnafu { path })?;
    Ok(contents.trim().to_owned())
}

/// Path of the services list of `namespace`, relative to the API server.
pub fn services_path(namespace: &str) -> String {
    format!("/api/v1/namespaces/{namespace}/services")
}

/// Fetches the raw services list of the service account's namespace.
///
/// The body is returned unparsed so it can be dumped for debugging before it
/// is interpreted.
///
/// With `verify_tls` unset the API server certificate is not verified. That is
/// the default for launchpad deployments, whose API server certificates are
/// not issued for the `kubernetes.default.svc` name.
pub async fn fetch_services(
    api_server: &Uri,
    account: &ServiceAccount,
    verify_tls: bool,
) -> Result<String> {
    let mut config = kube::Config::new(api_server.clone());
    config.default_namespace = account.namespace.clone();
    config.accept_invalid_certs = !verify_tls;
    config.auth_info.token = Some(account.token.clone().into());

    let client = kube::Client::try_from(config).context(CreateClientSnafu)?;

    let request = http::Request::get(services_path(&account.namespace))
        .body(Vec::new())
        .context(BuildRequestSnafu)?;

    tracing::info!(
        api_server = %api_server,
        namespace = %account.namespace,
        verify_tls,
        "Fetching service information"
    );
    let body = client
        .request_text(request)
        .await
        .context(FetchServicesSnafu {
            namespace: &account.namespace,
        })?;

    Ok(body)
}
