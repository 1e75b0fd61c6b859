//! The fixed application stack: seven resources built from stack options.

use serde_json::json;
use tracing::debug;

use crate::config::StackOptions;
use crate::error::PlanError;

use super::dependency::ResourceGraph;
use super::resource::{Resource, ResourceId, ResourceKind};

/// Public image served when the custom image is not selected.
pub const PREBUILT_IMAGE: &str = "us-docker.pkg.dev/cloudrun/container/hello:latest";

/// Artifact Registry repository the custom image is pushed to.
pub const CUSTOM_IMAGE_REPOSITORY: &str = "app";

/// Name of the application database and its user.
const DATABASE_NAME: &str = "app";

/// Where the container service gets its image from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Public prebuilt image.
    Prebuilt {
        /// Image reference.
        image: String,
    },
    /// Image built from this repository and pushed to the project's registry.
    Custom {
        /// Image reference.
        image: String,
    },
}

impl ImageSource {
    /// Selects the image source from the stack options.
    #[must_use]
    pub fn from_options(stack: &StackOptions) -> Self {
        if stack.use_custom_image {
            Self::Custom {
                image: format!(
                    "{}-docker.pkg.dev/{}/{CUSTOM_IMAGE_REPOSITORY}/app:latest",
                    stack.region, stack.project_id
                ),
            }
        } else {
            Self::Prebuilt {
                image: String::from(PREBUILT_IMAGE),
            }
        }
    }

    /// Returns the variant tag stored on the service.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Prebuilt { .. } => "prebuilt",
            Self::Custom { .. } => "custom",
        }
    }

    /// Returns the image reference.
    #[must_use]
    pub fn image(&self) -> &str {
        match self {
            Self::Prebuilt { image } | Self::Custom { image } => image,
        }
    }
}

/// Ids of the seven stack resources.
pub mod ids {
    use super::{ResourceId, ResourceKind};

    /// Runtime service account.
    #[must_use]
    pub fn service_account() -> ResourceId {
        ResourceId::new(ResourceKind::ServiceAccount, "app-runtime")
    }

    /// Database password secret.
    #[must_use]
    pub fn db_password() -> ResourceId {
        ResourceId::new(ResourceKind::Secret, "db-password")
    }

    /// Application encryption key secret.
    #[must_use]
    pub fn encryption_key() -> ResourceId {
        ResourceId::new(ResourceKind::Secret, "encryption-key")
    }

    /// Database instance.
    #[must_use]
    pub fn database() -> ResourceId {
        ResourceId::new(ResourceKind::DatabaseInstance, "app-db")
    }

    /// Secret accessor binding for the service account.
    #[must_use]
    pub fn secret_accessor() -> ResourceId {
        ResourceId::new(ResourceKind::RoleBinding, "secret-accessor")
    }

    /// Cloud SQL client binding for the service account.
    #[must_use]
    pub fn cloudsql_client() -> ResourceId {
        ResourceId::new(ResourceKind::RoleBinding, "cloudsql-client")
    }

    /// Container service.
    #[must_use]
    pub fn compute_service() -> ResourceId {
        ResourceId::new(ResourceKind::ComputeService, "app")
    }
}

/// Builds the desired resource graph for the stack.
///
/// The graph shape never depends on the options; `use_custom_image` only
/// changes the container service's image attributes.
///
/// # Errors
///
/// Returns a `PlanError` if the graph cannot be assembled.
pub fn build_stack_graph(stack: &StackOptions) -> Result<ResourceGraph, PlanError> {
    let project = stack.project_id.as_str();
    let region = stack.region.as_str();
    let sa_email = format!("{}@{project}.iam.gserviceaccount.com", ids::service_account().name);
    let member = format!("serviceAccount:{sa_email}");
    let image = ImageSource::from_options(stack);

    let service_account = Resource::new(ResourceKind::ServiceAccount, ids::service_account().name)
        .attr("project", project)
        .attr("display_name", "Application runtime identity")
        .attr("email", sa_email.as_str());

    let db_password = Resource::new(ResourceKind::Secret, ids::db_password().name)
        .attr("project", project)
        .attr("replication", "automatic")
        .sensitive_attr("value", json!({"generate": "random", "length": 32, "special": false}));

    let encryption_key = Resource::new(ResourceKind::Secret, ids::encryption_key().name)
        .attr("project", project)
        .attr("replication", "automatic")
        .sensitive_attr("value", json!({"generate": "random", "length": 32, "encoding": "base64"}));

    let database = Resource::new(ResourceKind::DatabaseInstance, ids::database().name)
        .attr("project", project)
        .attr("region", region)
        .attr("database_version", "POSTGRES_15")
        .attr("tier", stack.db_tier.as_str())
        .attr("database", DATABASE_NAME)
        .attr("user", DATABASE_NAME)
        .attr("password_secret", ids::db_password().to_string())
        .attr("deletion_protection", false)
        .depends_on(&ids::db_password());

    let secret_accessor = Resource::new(ResourceKind::RoleBinding, ids::secret_accessor().name)
        .attr("project", project)
        .attr("role", "roles/secretmanager.secretAccessor")
        .attr("member", member.as_str())
        .attr(
            "secrets",
            json!([ids::db_password().name, ids::encryption_key().name]),
        )
        .depends_on(&ids::service_account())
        .depends_on(&ids::db_password())
        .depends_on(&ids::encryption_key());

    let cloudsql_client = Resource::new(ResourceKind::RoleBinding, ids::cloudsql_client().name)
        .attr("project", project)
        .attr("role", "roles/cloudsql.client")
        .attr("member", member.as_str())
        .depends_on(&ids::service_account())
        .depends_on(&ids::database());

    let connection_name = format!("{project}:{region}:{}", ids::database().name);
    let service = Resource::new(ResourceKind::ComputeService, ids::compute_service().name)
        .attr("project", project)
        .attr("region", region)
        .attr("image_source", image.tag())
        .attr("image", image.image())
        .attr("service_account", sa_email.as_str())
        .attr("min_instances", stack.min_instances)
        .attr("max_instances", stack.max_instances)
        .attr("custom_domain", stack.custom_domain.as_str())
        .attr("cloudsql_instance", connection_name.as_str())
        .attr(
            "env",
            json!({
                "DB_NAME": DATABASE_NAME,
                "DB_USER": DATABASE_NAME,
                "DB_SOCKET": format!("/cloudsql/{connection_name}"),
                "DB_PASSWORD": {"secret": ids::db_password().name, "version": "latest"},
                "ENCRYPTION_KEY": {"secret": ids::encryption_key().name, "version": "latest"},
            }),
        )
        .depends_on(&ids::service_account())
        .depends_on(&ids::db_password())
        .depends_on(&ids::encryption_key())
        .depends_on(&ids::database())
        .depends_on(&ids::secret_accessor())
        .depends_on(&ids::cloudsql_client());

    let mut graph = ResourceGraph::new();
    for resource in [
        service_account,
        db_password,
        encryption_key,
        database,
        secret_accessor,
        cloudsql_client,
        service,
    ] {
        graph.insert(resource)?;
    }

    debug!(
        "Built stack graph for {project} ({} resources, image source {})",
        graph.len(),
        image.tag()
    );
    Ok(graph)
}
