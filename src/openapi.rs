//! OpenAPI documentation served through Swagger UI.

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::error::ApiError;
use crate::pagination::PaginationMeta;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Dealergate API",
        version = "1.0.0",
        description = "Per-dealership module permissions for the dealership operations platform.\n\n\
        ## Model\n\
        - Dealerships toggle modules (sales orders, car wash, get ready, ...) on and off\n\
        - Custom roles grant granular `module.permission_key` pairs\n\
        - Each member holds at most one custom role per dealership\n\
        - `system_admin` sees everything; elevated users with `bypass_custom_roles` get every enabled module\n\n\
        ## Authentication\n\
        Every endpoint except health and metrics requires `Authorization: Bearer <token>`.\n\
        Tokens are Ed25519 JWTs issued by the identity service.\n\n\
        ## Dealership Context\n\
        `/me/*` and the admin endpoints require a token scoped to a dealership.\n\
        Permission denials on `/me/permissions/check*` are answers (`allowed: false`), not errors.",
        contact(
            name = "Dealergate API Support"
        ),
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "/", description = "Current server")
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Guard", description = "Permission checks for the calling user"),
        (name = "Roles", description = "Custom roles within a dealership"),
        (name = "Permissions", description = "Module permission catalog and role grants"),
        (name = "Members", description = "Custom role assignment for dealership members"),
        (name = "Modules", description = "Dealership module toggles"),
        (name = "Users", description = "Platform-level user settings")
    ),
    paths(
        crate::handlers::health::health_check_simple,
        crate::handlers::health::health_check,
        crate::handlers::health::ready_check,
        crate::handlers::health::live_check,

        crate::handlers::guard::my_permissions,
        crate::handlers::guard::check_permission,
        crate::handlers::guard::check_permissions_bulk,
        crate::handlers::guard::module_access,
        crate::handlers::guard::refresh_permissions,
        crate::handlers::guard::logout,

        crate::handlers::roles::create_role,
        crate::handlers::roles::list_roles,
        crate::handlers::roles::update_role,

        crate::handlers::permissions::list_catalog,
        crate::handlers::permissions::list_role_permissions,
        crate::handlers::permissions::grant_permission,
        crate::handlers::permissions::revoke_permission,

        crate::handlers::members::list_members,
        crate::handlers::members::assign_member_role,

        crate::handlers::modules::list_modules,
        crate::handlers::modules::set_module,

        crate::handlers::users::set_bypass,
    ),
    components(
        schemas(
            ApiError,
            PaginationMeta,

            crate::permissions::AppModule,
            crate::permissions::PermissionLevel,
            crate::permissions::AccessSource,
            crate::permissions::UserRole,

            crate::handlers::health::HealthResponse,
            crate::handlers::health::ReadinessResponse,
            crate::handlers::health::ReadinessChecks,
            crate::handlers::health::ComponentStatus,
            crate::handlers::health::CacheStatus,

            crate::handlers::guard::MyPermissionsResponse,
            crate::handlers::guard::CheckPermissionRequest,
            crate::handlers::guard::CheckPermissionResponse,
            crate::handlers::guard::CheckPermissionsBulkRequest,
            crate::handlers::guard::CheckPermissionsBulkResponse,
            crate::handlers::guard::ModuleAccessResponse,
            crate::handlers::guard::LogoutResponse,

            crate::models::CustomRole,
            crate::handlers::roles::CreateRoleRequest,
            crate::handlers::roles::UpdateRoleRequest,
            crate::handlers::roles::RoleResponse,
            crate::handlers::roles::RolesListResponse,

            crate::models::ModulePermission,
            crate::handlers::permissions::GrantPermissionRequest,
            crate::handlers::permissions::CatalogResponse,
            crate::handlers::permissions::RolePermissionsResponse,

            crate::handlers::members::AssignRoleRequest,
            crate::handlers::members::MemberResponse,
            crate::handlers::members::MembersListResponse,

            crate::handlers::modules::ToggleModuleRequest,
            crate::handlers::modules::ModuleStatus,
            crate::handlers::modules::ModulesListResponse,

            crate::handlers::users::SetBypassRequest,
            crate::handlers::users::BypassResponse,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Ed25519 JWT access token. Scope it to a dealership for `/me/*` and admin routes.\n\
                            Include in requests as: `Authorization: Bearer <token>`",
                        ))
                        .build(),
                ),
            );
        }

        openapi.security = Some(vec![]);
    }
}

pub fn swagger_router() -> Router {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "Dealergate API");
        assert_eq!(spec.info.version, "1.0.0");
    }

    #[test]
    fn test_openapi_has_security_scheme() {
        let spec = ApiDoc::openapi();
        assert!(spec.components.is_some());
        let components = spec.components.unwrap();
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }

    #[test]
    fn test_openapi_has_tags() {
        let spec = ApiDoc::openapi();
        assert!(spec.tags.is_some());
        let tags = spec.tags.unwrap();
        assert!(tags.iter().any(|t| t.name == "Guard"));
        assert!(tags.iter().any(|t| t.name == "Health"));
    }

    #[test]
    fn test_openapi_documents_guard_paths() {
        let spec = ApiDoc::openapi();
        assert!(spec.paths.paths.contains_key("/me/permissions/check"));
        assert!(spec.paths.paths.contains_key("/me/modules/{module}"));
        assert!(spec.paths.paths.contains_key("/users/{user_id}/bypass"));
    }
}
