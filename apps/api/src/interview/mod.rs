// Interview time ledger: timed mock-interview sessions billed against the user's
// remaining minutes. All vendor calls go through conversation; all balance writes
// go through ledger.

pub mod clock;
pub mod conversation;
pub mod handlers;
pub mod ledger;
pub mod store;
pub mod timing;
