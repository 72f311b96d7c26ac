//! Services over the in-memory stack, with one admin and two users.

#![allow(dead_code)]

use std::sync::Arc;

use alpaca_core::{AlpacaConfig, Role, UserAccount};
use alpaca_service::{
    Caller, RequestContext, ReviewService, StatisticsService, SubmitRecordRequest,
};
use alpaca_test_utils::fixtures::StoreHarness;

pub struct ServiceHarness {
    pub stack: StoreHarness,
    pub review: ReviewService,
    pub statistics: StatisticsService,
    pub admin: UserAccount,
    pub alice: UserAccount,
    pub bob: UserAccount,
}

impl ServiceHarness {
    pub fn new() -> Self {
        let stack = StoreHarness::new();
        let admin = stack.add_user("root", Role::Admin).expect("add admin");
        let alice = stack.add_user("alice", Role::User).expect("add alice");
        let bob = stack.add_user("bob", Role::User).expect("add bob");
        let config = Arc::new(AlpacaConfig::default());
        Self {
            review: ReviewService::new(stack.repo.clone(), config.clone()),
            statistics: StatisticsService::new(stack.repo.clone(), config),
            stack,
            admin,
            alice,
            bob,
        }
    }

    pub fn ctx(user: &UserAccount) -> RequestContext {
        let caller = if user.role.is_admin() {
            Caller::admin(user.user_id, user.username.clone())
        } else {
            Caller::user(user.user_id, user.username.clone())
        };
        RequestContext::for_caller(caller)
    }

    pub fn as_admin(&self) -> RequestContext {
        Self::ctx(&self.admin)
    }

    pub fn as_alice(&self) -> RequestContext {
        Self::ctx(&self.alice)
    }

    pub fn as_bob(&self) -> RequestContext {
        Self::ctx(&self.bob)
    }
}

pub fn submission(instruction: &str, output: &str) -> SubmitRecordRequest {
    SubmitRecordRequest {
        instruction: instruction.to_string(),
        input: String::new(),
        output: output.to_string(),
        theme: Some("math".to_string()),
        source: "textbook".to_string(),
        note: None,
    }
}
