// Request identity for dashboard channels
//
// Session and tenant ids arrive from the browser (query, header or cookie)
// and the publish endpoint is guarded by a shared secret. Login and
// cookie issuance live outside this service.

pub mod identity;

pub use identity::{
    verify_publish_secret, Conversation, IdentityError, SessionIdentity, TenantIdentity,
    PUBLISH_SECRET_HEADER,
};
