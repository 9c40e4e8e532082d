use axum::Json;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDoc {
    pub method: &'static str,
    pub path: &'static str,
    pub requires_auth: bool,
    pub description: &'static str,
}

pub const ENDPOINTS: &[EndpointDoc] = &[
    EndpointDoc {
        method: "POST",
        path: "/api/auth",
        requires_auth: false,
        description: "Register a new user",
    },
    EndpointDoc {
        method: "PUT",
        path: "/api/auth",
        requires_auth: false,
        description: "Login existing user",
    },
    EndpointDoc {
        method: "DELETE",
        path: "/api/auth",
        requires_auth: true,
        description: "Logout a user",
    },
    EndpointDoc {
        method: "GET",
        path: "/api/user/me",
        requires_auth: true,
        description: "Get authenticated user",
    },
    EndpointDoc {
        method: "GET",
        path: "/api/user",
        requires_auth: true,
        description: "List users (admin only)",
    },
    EndpointDoc {
        method: "PUT",
        path: "/api/user/:userId",
        requires_auth: true,
        description: "Update user",
    },
    EndpointDoc {
        method: "GET",
        path: "/api/franchise",
        requires_auth: false,
        description: "List franchises",
    },
    EndpointDoc {
        method: "POST",
        path: "/api/franchise",
        requires_auth: true,
        description: "Create a new franchise (admin only)",
    },
    EndpointDoc {
        method: "GET",
        path: "/api/franchise/:userId",
        requires_auth: true,
        description: "List a user's franchises",
    },
    EndpointDoc {
        method: "DELETE",
        path: "/api/franchise/:franchiseId",
        requires_auth: true,
        description: "Delete a franchise (admin only)",
    },
    EndpointDoc {
        method: "POST",
        path: "/api/franchise/:franchiseId/store",
        requires_auth: true,
        description: "Create a new franchise store",
    },
    EndpointDoc {
        method: "DELETE",
        path: "/api/franchise/:franchiseId/store/:storeId",
        requires_auth: true,
        description: "Delete a store",
    },
    EndpointDoc {
        method: "GET",
        path: "/api/order/menu",
        requires_auth: false,
        description: "Get the pizza menu",
    },
    EndpointDoc {
        method: "PUT",
        path: "/api/order/menu",
        requires_auth: true,
        description: "Add an item to the menu (admin only)",
    },
    EndpointDoc {
        method: "GET",
        path: "/api/order",
        requires_auth: true,
        description: "Get the orders for the authenticated user",
    },
    EndpointDoc {
        method: "POST",
        path: "/api/order",
        requires_auth: true,
        description: "Create an order for the authenticated user",
    },
];

#[derive(Serialize)]
pub struct DocsResponse {
    pub version: &'static str,
    pub endpoints: &'static [EndpointDoc],
}

pub async fn docs() -> Json<DocsResponse> {
    Json(DocsResponse {
        version: env!("CARGO_PKG_VERSION"),
        endpoints: ENDPOINTS,
    })
}
