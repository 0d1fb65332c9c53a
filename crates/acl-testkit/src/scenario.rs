//! Scenario composition
//!
//! Named describe blocks combining an identity builder, one remote call and
//! whatever checks the caller registers inside. They only use the builders,
//! the invoker and the checks; the blocks keep no state of their own.
//!
//! Like the builders, every composition is a [`Registrar`] method, so it is
//! available suite-scoped through [`Suite::once`] (the identity is created
//! and the call made once for the whole block) and test-scoped through
//! [`Suite::each`]. The same names on [`Suite`] are the test-scoped forms.
//!
//! ```rust
//! use acl_testkit::{RemoteCall, Suite};
//! use serde_json::json;
//!
//! let mut suite = Suite::new("widgets");
//! suite.when_called_anonymously(RemoteCall::get("/widgets/1"), |s| {
//!     s.should_be_denied();
//! });
//! suite.once().when_called_by_user_with_role(
//!     json!({"email": "admin@example.com", "password": "secret"}),
//!     "admin",
//!     RemoteCall::get("/widgets/1"),
//!     |s| {
//!         s.should_be_allowed();
//!         s.should_not_be_found();
//!     },
//! );
//! assert_eq!(suite.test_count(), 3);
//! ```

use crate::context::MethodKind;
use crate::fixtures::RoleSpec;
use crate::lifecycle::{Registrar, Suite};
use crate::remote::RemoteCall;
use serde_json::{json, Value};

impl Registrar<'_> {
    /// Nested block titled `"<VERB> <url>"` that performs `call` in this
    /// registrar's scope
    pub fn when_called_remotely(
        &mut self,
        call: RemoteCall,
        define: impl FnOnce(&mut Suite),
    ) -> &mut Self {
        let scope = self.scope;
        self.suite.describe(call.title(), move |block| {
            block.scoped(scope).call_remotely(call);
            define(block);
        });
        self
    }

    /// `call` made with the anonymous token and no logged-in user
    pub fn when_called_anonymously(
        &mut self,
        call: RemoteCall,
        define: impl FnOnce(&mut Suite),
    ) -> &mut Self {
        let scope = self.scope;
        self.suite.describe("when called anonymously", move |block| {
            block
                .scoped(scope)
                .given_an_anonymous_token(())
                .when_called_remotely(call, define);
        });
        self
    }

    /// `call` made with a bare token that belongs to no user
    pub fn when_called_unauthenticated(
        &mut self,
        call: RemoteCall,
        define: impl FnOnce(&mut Suite),
    ) -> &mut Self {
        let scope = self.scope;
        self.suite
            .describe("when called with unauthenticated token", move |block| {
                block
                    .scoped(scope)
                    .given_an_unauthenticated_token(json!({}), ())
                    .when_called_remotely(call, define);
            });
        self
    }

    /// `call` made by a freshly created, logged-in user
    pub fn when_called_by_user(
        &mut self,
        credentials: Value,
        call: RemoteCall,
        define: impl FnOnce(&mut Suite),
    ) -> &mut Self {
        let scope = self.scope;
        self.suite.describe("when called by logged in user", move |block| {
            block
                .scoped(scope)
                .given_logged_in_user(credentials, ())
                .when_called_remotely(call, define);
        });
        self
    }

    /// `call` made by a logged-in user holding `role`
    pub fn when_called_by_user_with_role(
        &mut self,
        credentials: Value,
        role: impl Into<RoleSpec>,
        call: RemoteCall,
        define: impl FnOnce(&mut Suite),
    ) -> &mut Self {
        let scope = self.scope;
        let role = role.into();
        let title = format!("when called by logged in user with role {role}");
        self.suite.describe(title, move |block| {
            block
                .scoped(scope)
                .given_logged_in_user_with_role(credentials, role, ())
                .when_called_remotely(call, define);
        });
        self
    }

    /// Block in which a freshly created user is logged in
    pub fn when_logged_in_as_user(
        &mut self,
        credentials: Value,
        define: impl FnOnce(&mut Suite),
    ) -> &mut Self {
        let scope = self.scope;
        self.suite.describe("when logged in as user", move |block| {
            block.scoped(scope).given_logged_in_user(credentials, ());
            define(block);
        });
        self
    }

    /// Block in which a user holding `role` is logged in
    pub fn when_logged_in_as_user_with_role(
        &mut self,
        credentials: Value,
        role: impl Into<RoleSpec>,
        define: impl FnOnce(&mut Suite),
    ) -> &mut Self {
        let scope = self.scope;
        let role = role.into();
        let title = format!("when logged in as user with role {role}");
        self.suite.describe(title, move |block| {
            block
                .scoped(scope)
                .given_logged_in_user_with_role(credentials, role, ());
            define(block);
        });
        self
    }

    /// Anonymous call that must be allowed
    pub fn should_be_allowed_when_called_anonymously(&mut self, call: RemoteCall) -> &mut Self {
        self.when_called_anonymously(call, |block| {
            block.should_be_allowed();
        })
    }

    /// Anonymous call that must be denied
    pub fn should_be_denied_when_called_anonymously(&mut self, call: RemoteCall) -> &mut Self {
        self.when_called_anonymously(call, |block| {
            block.should_be_denied();
        })
    }

    /// Unauthenticated call that must be allowed
    pub fn should_be_allowed_when_called_unauthenticated(&mut self, call: RemoteCall) -> &mut Self {
        self.when_called_unauthenticated(call, |block| {
            block.should_be_allowed();
        })
    }

    /// Unauthenticated call that must be denied
    pub fn should_be_denied_when_called_unauthenticated(&mut self, call: RemoteCall) -> &mut Self {
        self.when_called_unauthenticated(call, |block| {
            block.should_be_denied();
        })
    }

    /// Call by a logged-in user that must be allowed
    pub fn should_be_allowed_when_called_by_user(
        &mut self,
        credentials: Value,
        call: RemoteCall,
    ) -> &mut Self {
        self.when_called_by_user(credentials, call, |block| {
            block.should_be_allowed();
        })
    }

    /// Call by a logged-in user that must be denied
    pub fn should_be_denied_when_called_by_user(
        &mut self,
        credentials: Value,
        call: RemoteCall,
    ) -> &mut Self {
        self.when_called_by_user(credentials, call, |block| {
            block.should_be_denied();
        })
    }

    /// Call by a user holding `role` that must be allowed
    pub fn should_be_allowed_when_called_by_user_with_role(
        &mut self,
        credentials: Value,
        role: impl Into<RoleSpec>,
        call: RemoteCall,
    ) -> &mut Self {
        self.when_called_by_user_with_role(credentials, role, call, |block| {
            block.should_be_allowed();
        })
    }

    /// Call by a user holding `role` that must be denied
    pub fn should_be_denied_when_called_by_user_with_role(
        &mut self,
        credentials: Value,
        role: impl Into<RoleSpec>,
        call: RemoteCall,
    ) -> &mut Self {
        self.when_called_by_user_with_role(credentials, role, call, |block| {
            block.should_be_denied();
        })
    }
}

/// Test-scoped forms of the [`Registrar`] compositions
impl Suite {
    /// See [`Registrar::when_called_remotely`]
    pub fn when_called_remotely(
        &mut self,
        call: RemoteCall,
        define: impl FnOnce(&mut Suite),
    ) -> &mut Self {
        self.each().when_called_remotely(call, define);
        self
    }

    /// See [`Registrar::when_called_anonymously`]
    pub fn when_called_anonymously(
        &mut self,
        call: RemoteCall,
        define: impl FnOnce(&mut Suite),
    ) -> &mut Self {
        self.each().when_called_anonymously(call, define);
        self
    }

    /// See [`Registrar::when_called_unauthenticated`]
    pub fn when_called_unauthenticated(
        &mut self,
        call: RemoteCall,
        define: impl FnOnce(&mut Suite),
    ) -> &mut Self {
        self.each().when_called_unauthenticated(call, define);
        self
    }

    /// See [`Registrar::when_called_by_user`]
    pub fn when_called_by_user(
        &mut self,
        credentials: Value,
        call: RemoteCall,
        define: impl FnOnce(&mut Suite),
    ) -> &mut Self {
        self.each().when_called_by_user(credentials, call, define);
        self
    }

    /// See [`Registrar::when_called_by_user_with_role`]
    pub fn when_called_by_user_with_role(
        &mut self,
        credentials: Value,
        role: impl Into<RoleSpec>,
        call: RemoteCall,
        define: impl FnOnce(&mut Suite),
    ) -> &mut Self {
        self.each()
            .when_called_by_user_with_role(credentials, role, call, define);
        self
    }

    /// See [`Registrar::when_logged_in_as_user`]
    pub fn when_logged_in_as_user(
        &mut self,
        credentials: Value,
        define: impl FnOnce(&mut Suite),
    ) -> &mut Self {
        self.each().when_logged_in_as_user(credentials, define);
        self
    }

    /// See [`Registrar::when_logged_in_as_user_with_role`]
    pub fn when_logged_in_as_user_with_role(
        &mut self,
        credentials: Value,
        role: impl Into<RoleSpec>,
        define: impl FnOnce(&mut Suite),
    ) -> &mut Self {
        self.each()
            .when_logged_in_as_user_with_role(credentials, role, define);
        self
    }

    /// Block exercising the static method `name`, titled `.name`
    pub fn static_method(&mut self, name: &str, define: impl FnOnce(&mut Suite)) -> &mut Self {
        let name = name.to_string();
        self.describe(format!(".{name}"), move |block| {
            block.each().with_method_under_test(name, MethodKind::Static);
            define(block);
        })
    }

    /// Block exercising the instance method `name`, titled `.prototype.name`
    pub fn instance_method(&mut self, name: &str, define: impl FnOnce(&mut Suite)) -> &mut Self {
        let name = name.to_string();
        self.describe(format!(".prototype.{name}"), move |block| {
            block.each().with_method_under_test(name, MethodKind::Instance);
            define(block);
        })
    }

    /// See [`Registrar::should_be_allowed_when_called_anonymously`]
    pub fn should_be_allowed_when_called_anonymously(&mut self, call: RemoteCall) -> &mut Self {
        self.each().should_be_allowed_when_called_anonymously(call);
        self
    }

    /// See [`Registrar::should_be_denied_when_called_anonymously`]
    pub fn should_be_denied_when_called_anonymously(&mut self, call: RemoteCall) -> &mut Self {
        self.each().should_be_denied_when_called_anonymously(call);
        self
    }

    /// See [`Registrar::should_be_allowed_when_called_unauthenticated`]
    pub fn should_be_allowed_when_called_unauthenticated(&mut self, call: RemoteCall) -> &mut Self {
        self.each().should_be_allowed_when_called_unauthenticated(call);
        self
    }

    /// See [`Registrar::should_be_denied_when_called_unauthenticated`]
    pub fn should_be_denied_when_called_unauthenticated(&mut self, call: RemoteCall) -> &mut Self {
        self.each().should_be_denied_when_called_unauthenticated(call);
        self
    }

    /// See [`Registrar::should_be_allowed_when_called_by_user`]
    pub fn should_be_allowed_when_called_by_user(
        &mut self,
        credentials: Value,
        call: RemoteCall,
    ) -> &mut Self {
        self.each().should_be_allowed_when_called_by_user(credentials, call);
        self
    }

    /// See [`Registrar::should_be_denied_when_called_by_user`]
    pub fn should_be_denied_when_called_by_user(
        &mut self,
        credentials: Value,
        call: RemoteCall,
    ) -> &mut Self {
        self.each().should_be_denied_when_called_by_user(credentials, call);
        self
    }

    /// See [`Registrar::should_be_allowed_when_called_by_user_with_role`]
    pub fn should_be_allowed_when_called_by_user_with_role(
        &mut self,
        credentials: Value,
        role: impl Into<RoleSpec>,
        call: RemoteCall,
    ) -> &mut Self {
        self.each()
            .should_be_allowed_when_called_by_user_with_role(credentials, role, call);
        self
    }

    /// See [`Registrar::should_be_denied_when_called_by_user_with_role`]
    pub fn should_be_denied_when_called_by_user_with_role(
        &mut self,
        credentials: Value,
        role: impl Into<RoleSpec>,
        call: RemoteCall,
    ) -> &mut Self {
        self.each()
            .should_be_denied_when_called_by_user_with_role(credentials, role, call);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ScopeKind;
    use crate::remote::Resolvable;

    fn titles(suite: &Suite, out: &mut Vec<String>, prefix: &str) {
        for child in suite.children() {
            let title = format!("{prefix}/{}", child.title());
            out.push(title.clone());
            titles(child, out, &title);
        }
    }

    #[test]
    fn test_composition_titles() {
        let mut suite = Suite::new("");
        suite.should_be_denied_when_called_anonymously(RemoteCall::get("/widgets"));
        suite.should_be_allowed_when_called_by_user_with_role(
            json!({"email": "a@b.c", "password": "pw"}),
            "admin",
            RemoteCall::delete(Resolvable::deferred(|_ctx| Ok("/widgets/1".to_string()))),
        );
        suite.instance_method("save", |_| {});

        let mut out = Vec::new();
        titles(&suite, &mut out, "");
        assert_eq!(
            out,
            vec![
                "/when called anonymously",
                "/when called anonymously/GET /widgets",
                "/when called by logged in user with role admin",
                "/when called by logged in user with role admin/DELETE /<dynamic>",
                "/.prototype.save",
            ]
        );
    }

    #[test]
    fn test_call_is_registered_after_identity() {
        let mut suite = Suite::new("");
        suite.when_called_by_user(json!({"email": "a@b.c"}), RemoteCall::get("/me"), |_| {});

        let outer = &suite.children()[0];
        let inner = &outer.children()[0];
        assert_eq!(outer.phases(ScopeKind::Test).len(), 4);
        assert_eq!(inner.phases(ScopeKind::Test)[0].label(), "GET /me");
        assert!(inner.phases(ScopeKind::Suite).is_empty());
    }

    #[test]
    fn test_suite_scoped_composition_uses_once_slots() {
        let mut suite = Suite::new("");
        suite
            .once()
            .when_called_anonymously(RemoteCall::get("/widgets"), |block| {
                block.should_be_denied();
            });

        let outer = &suite.children()[0];
        let inner = &outer.children()[0];
        assert!(suite.phases(ScopeKind::Suite).is_empty());
        assert_eq!(outer.phases(ScopeKind::Suite).len(), 2);
        assert!(outer.phases(ScopeKind::Test).is_empty());
        assert_eq!(inner.phases(ScopeKind::Suite)[0].label(), "GET /widgets");
        assert!(inner.phases(ScopeKind::Test).is_empty());
    }
}
