use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{models, routes};

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::menu::menu,
		routes::menu::side,
		routes::menu::permissions,
		routes::access::check_access,
		routes::security::list_roles,
		routes::security::create_role,
		routes::security::delete_role,
		routes::security::role_grants,
		routes::security::grant,
		routes::security::revoke,
		routes::security::converge,
		routes::security::cleanup
	),
	components(
		schemas(
			routes::health::HealthResponse,
			models::security::Permission,
			models::security::Resource,
			models::security::PermissionResource,
			models::security::PvmKey,
			models::security::Role,
			models::security::RoleCreateRequest,
			models::security::RoleGrant,
			models::security::GrantRequest
		)
	),
	tags(
		(name = "Health", description = "Service health"),
		(name = "Navigation", description = "Menus and permissions visible to the caller"),
		(name = "Access", description = "Authorization checks"),
		(name = "Security", description = "Role, grant and reconciliation administration")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	ensure_security_components(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.persist_authorization(true);

	let json_route = get(move || {
		let doc = doc.clone();
		async move { Json(doc) }
	});

	Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config))
}

fn ensure_security_components(doc: &mut Value) {
	let Some(root) = doc.as_object_mut() else {
		return;
	};

	let components = root
		.entry("components")
		.or_insert_with(|| Value::Object(Map::new()));
	if let Some(components) = components.as_object_mut() {
		let schemes = components
			.entry("securitySchemes")
			.or_insert_with(|| Value::Object(Map::new()));
		if let Some(schemes) = schemes.as_object_mut() {
			schemes.insert(
				"bearerAuth".to_string(),
				json!({
					"type": "http",
					"scheme": "bearer",
					"bearerFormat": "JWT"
				}),
			);
		}
	}
}

fn ensure_servers(doc: &mut Value, port: u16) {
	let server_url = format!("http://localhost:{}", port);

	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr.iter().any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn openapi_lists_security_paths_and_bearer_scheme() {
		let doc = serde_json::to_value(build_openapi(8000).unwrap()).unwrap();

		assert!(doc["paths"]["/api/security/roles"]["get"].is_object());
		assert!(doc["paths"]["/api/access/{resource}/{operation}"]["get"].is_object());
		assert_eq!(doc["components"]["securitySchemes"]["bearerAuth"]["scheme"], "bearer");
		assert_eq!(doc["servers"][0]["url"], "http://localhost:8000");
	}
}
