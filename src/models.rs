use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Queryable, Selectable, Serialize, Clone)]
#[diesel(table_name = crate::schema::users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub role: String,
    pub bypass_custom_roles: bool,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Queryable, Selectable, Serialize, ToSchema)]
#[diesel(table_name = crate::schema::dealer_custom_roles)]
pub struct CustomRole {
    pub id: Uuid,
    pub dealership_id: Uuid,
    #[schema(example = "carwash_only")]
    pub role_name: String,
    #[schema(example = "Car Wash Only")]
    pub display_name: String,
    #[schema(example = "Car wash attendants")]
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::dealer_custom_roles)]
pub struct NewCustomRole {
    pub dealership_id: Uuid,
    pub role_name: String,
    pub display_name: String,
    pub description: Option<String>,
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = crate::schema::dealer_memberships)]
pub struct DealerMembership {
    pub id: Uuid,
    pub user_id: Uuid,
    pub dealership_id: Uuid,
    pub custom_role_id: Option<Uuid>,
    pub is_active: bool,
    pub joined_at: NaiveDateTime,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone, ToSchema)]
#[diesel(table_name = crate::schema::module_permissions)]
pub struct ModulePermission {
    pub id: Uuid,
    #[schema(example = "get_ready")]
    pub module: String,
    #[schema(example = "view_vehicles")]
    pub permission_key: String,
    #[schema(example = "View vehicles")]
    pub display_name: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::role_module_permissions)]
pub struct NewRoleModulePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
}

#[derive(Debug, Queryable, Selectable, Serialize, ToSchema)]
#[diesel(table_name = crate::schema::dealership_modules)]
pub struct DealerModuleToggle {
    pub dealership_id: Uuid,
    #[schema(example = "get_ready")]
    pub module: String,
    pub is_enabled: bool,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::dealership_modules)]
pub struct NewDealerModuleToggle {
    pub dealership_id: Uuid,
    pub module: String,
    pub is_enabled: bool,
}
