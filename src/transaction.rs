//! Thread-scoped transactions for transactional cache maps.
//!
//! A transaction is bound to the thread that opened it. Transactional maps
//! touched inside [`run_in_transaction`] register a member that buffers their
//! changes; the members are committed when the closure returns `Ok` and rolled
//! back when it returns `Err` or panics.
//!
//! ```ignore
//! run_in_transaction(|| {
//!     cache.invalidate(&EntryFilter::key(7), true);
//!     cache.get(&7)
//! })?;
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<Rc<Transaction>>> = const { RefCell::new(None) };
}

/// Participant in a transaction, one per transactional map.
pub trait TransactionMember: Any {
    /// Id of the map this member belongs to.
    fn member_id(&self) -> u64;

    fn commit(&self);

    fn rollback(&self);

    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

/// A running transaction.
pub struct Transaction {
    id: u64,
    members: RefCell<Vec<Rc<dyn TransactionMember>>>,
}

impl Transaction {
    fn new() -> Self {
        Self {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
            members: RefCell::new(Vec::new()),
        }
    }

    /// The transaction open on this thread, if any.
    pub fn current() -> Option<Rc<Transaction>> {
        CURRENT.with(|current| current.borrow().clone())
    }

    pub fn is_active() -> bool {
        CURRENT.with(|current| current.borrow().is_some())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn member(&self, member_id: u64) -> Option<Rc<dyn TransactionMember>> {
        self.members
            .borrow()
            .iter()
            .find(|member| member.member_id() == member_id)
            .cloned()
    }

    pub fn register_member(&self, member: Rc<dyn TransactionMember>) {
        trace!(tx = self.id, member = member.member_id(), "Transaction member registered");
        self.members.borrow_mut().push(member);
    }

    pub fn member_count(&self) -> usize {
        self.members.borrow().len()
    }

    fn commit(&self) {
        let members = self.members.take();
        debug!(tx = self.id, members = members.len(), "Committing transaction");
        for member in members {
            member.commit();
        }
    }

    fn rollback(&self) {
        let members = self.members.take();
        debug!(tx = self.id, members = members.len(), "Rolling back transaction");
        for member in members {
            member.rollback();
        }
    }
}

/// Uninstalls the transaction and finishes it, rolling back unless the scope
/// completed successfully.
struct TransactionScope {
    tx: Rc<Transaction>,
    committed: bool,
}

impl TransactionScope {
    fn enter() -> Self {
        let tx = Rc::new(Transaction::new());
        CURRENT.with(|current| *current.borrow_mut() = Some(Rc::clone(&tx)));
        Self {
            tx,
            committed: false,
        }
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        CURRENT.with(|current| current.borrow_mut().take());
        if self.committed {
            self.tx.commit();
        } else {
            self.tx.rollback();
        }
    }
}

/// Run `f` inside a transaction.
///
/// Joins the transaction already open on this thread, if there is one; the
/// outermost call decides the outcome.
pub fn run_in_transaction<T, E, F>(f: F) -> std::result::Result<T, E>
where
    F: FnOnce() -> std::result::Result<T, E>,
{
    if Transaction::is_active() {
        return f();
    }

    let mut scope = TransactionScope::enter();
    let result = f();
    scope.committed = result.is_ok();
    drop(scope);
    result
}
