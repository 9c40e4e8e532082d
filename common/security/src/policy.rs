use tracing::warn;

use crate::actor::Actor;

/// Every API operation with an authorization decision attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ListMenu,
    AddMenuItem,
    ListFranchises,
    CreateFranchise,
    DeleteFranchise,
    ListUserFranchises,
    CreateStore,
    DeleteStore,
    ReadUser,
    UpdateUser,
    ListUsers,
    PlaceOrder,
    ListOrders,
    Logout,
    ReadDocs,
}

/// The relationship an action requires between the caller and its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Authenticated,
    Admin,
    SelfOrAdmin,
    /// Registered admin of the target franchise, or platform admin.
    FranchiseOperator,
}

/// How the caller actually relates to the target resource, resolved by the
/// handler from persistent state before asking for a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    None,
    SelfUser,
    FranchiseOperator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Granted,
    /// Allowed to proceed but sees an empty result set. Ownership mismatch
    /// on the my-franchises listing answers 200 + [] rather than 403; kept
    /// exactly as the API behaves in production.
    Masked,
    Denied,
}

// The single policy table. Handlers never duplicate role checks.
pub fn required_access(action: Action) -> Access {
    use Access::*;
    use Action::*;
    match action {
        ListMenu | ListFranchises | ReadDocs => Public,
        PlaceOrder | ListOrders | Logout => Authenticated,
        AddMenuItem | CreateFranchise | DeleteFranchise | ListUsers => Admin,
        ReadUser | UpdateUser | ListUserFranchises => SelfOrAdmin,
        CreateStore | DeleteStore => FranchiseOperator,
    }
}

pub fn authorize(actor: &Actor, action: Action, relationship: Relationship) -> Decision {
    let allowed = match required_access(action) {
        Access::Public | Access::Authenticated => true,
        Access::Admin => actor.is_admin(),
        Access::SelfOrAdmin => actor.is_admin() || relationship == Relationship::SelfUser,
        Access::FranchiseOperator => {
            actor.is_admin() || relationship == Relationship::FranchiseOperator
        }
    };

    if allowed {
        return Decision::Granted;
    }

    if action == Action::ListUserFranchises {
        return Decision::Masked;
    }

    warn!(user_id = %actor.user_id, ?action, ?relationship, "authorization denied");
    Decision::Denied
}
