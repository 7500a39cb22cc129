mod common;

use vigil::{
    BufferedStream, EventSink, Handle, Loop, LoopError, Notifier, NotifierId, NotifierRef,
    PollLoop,
};

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

const SHORT: Duration = Duration::from_millis(100);

fn quiet_notifier(fd: i32) -> (Rc<std::cell::RefCell<Notifier>>, NotifierRef) {
    let n = Notifier::builder()
        .handle(Handle::new(fd))
        .on_read_ready(|_, _| {})
        .build()
        .expect("notifier config");
    let nref: NotifierRef = n.clone();
    (n, nref)
}

#[test]
fn children_follow_their_root_into_and_out_of_a_loop() {
    let (s1, s2) = common::socketpair();
    let (p1, p2) = common::pipe();

    let (parent, pref) = quiet_notifier(s1);

    let child_read = Rc::new(Cell::new(false));
    let child = Notifier::builder()
        .read_handle(Handle::new(p1))
        .on_read_ready({
            let flag = child_read.clone();
            move |_, _| flag.set(true)
        })
        .build()
        .expect("notifier config");
    let cref: NotifierRef = child.clone();

    parent.borrow_mut().add_child(&cref).expect("add_child");
    assert_eq!(parent.borrow().child_count(), 1);
    assert_eq!(child.borrow().parent_id(), Some(parent.borrow().id()));

    let mut lp = PollLoop::new();
    lp.add(&pref).expect("add");

    // Both ended up in the same loop.
    let core = parent.borrow().member_of().expect("parent registered");
    let child_core = child.borrow().member_of().expect("child registered");
    assert!(Rc::ptr_eq(&core, &child_core));

    // The child is dispatched like any other member.
    common::write(p2, b"x");
    assert_eq!(lp.loop_once(Some(SHORT)).expect("wait"), 1);
    assert!(child_read.get());

    // Removing the root takes the child along.
    lp.remove(&pref).expect("remove");
    assert!(parent.borrow().member_of().is_none());
    assert!(child.borrow().member_of().is_none());
    assert!(lp.interest().is_empty());

    // The tree itself stays intact.
    assert_eq!(parent.borrow().child_count(), 1);
    assert_eq!(child.borrow().parent_id(), Some(parent.borrow().id()));

    common::close(s1);
    common::close(s2);
    common::close(p1);
    common::close(p2);
}

#[test]
fn child_added_to_a_registered_parent_joins_immediately() {
    let (s1, s2) = common::socketpair();
    let (p1, p2) = common::pipe();

    let (parent, pref) = quiet_notifier(s1);
    let (child, cref) = quiet_notifier(p1);

    let mut lp = PollLoop::new();
    lp.add(&pref).expect("add");

    parent.borrow_mut().add_child(&cref).expect("add_child");
    assert!(child.borrow().member_of().is_some());
    assert_eq!(lp.interest().len(), 2);

    common::close(s1);
    common::close(s2);
    common::close(p1);
    common::close(p2);
}

#[test]
fn add_child_rejects_parented_and_registered_children() {
    let (s1, s2) = common::socketpair();
    let (p1, p2) = common::pipe();
    let (q1, q2) = common::pipe();

    let (parent_a, _aref) = quiet_notifier(s1);
    let (parent_b, _bref) = quiet_notifier(q1);
    let (_child, cref) = quiet_notifier(p1);

    parent_a.borrow_mut().add_child(&cref).expect("add_child");
    assert!(matches!(
        parent_b.borrow_mut().add_child(&cref),
        Err(LoopError::AlreadyParented)
    ));

    // A notifier already registered on its own cannot become a child.
    let (r1, r2) = common::socketpair();
    let (_solo, sref) = quiet_notifier(r1);
    let mut lp = PollLoop::new();
    lp.add(&sref).expect("add");
    assert!(matches!(
        parent_b.borrow_mut().add_child(&sref),
        Err(LoopError::AlreadyInLoop)
    ));

    common::close(s1);
    common::close(s2);
    common::close(p1);
    common::close(p2);
    common::close(q1);
    common::close(q2);
    common::close(r1);
    common::close(r2);
}

#[test]
fn a_parented_notifier_cannot_be_added_directly() {
    let (s1, s2) = common::socketpair();
    let (p1, p2) = common::pipe();

    let (parent, _pref) = quiet_notifier(s1);
    let (_child, cref) = quiet_notifier(p1);

    parent.borrow_mut().add_child(&cref).expect("add_child");

    let mut lp = PollLoop::new();
    assert!(matches!(lp.add(&cref), Err(LoopError::HasParent)));

    common::close(s1);
    common::close(s2);
    common::close(p1);
    common::close(p2);
}

#[test]
fn remove_child_detaches_and_deregisters() {
    let (s1, s2) = common::socketpair();
    let (p1, p2) = common::pipe();

    let (parent, pref) = quiet_notifier(s1);
    let (child, cref) = quiet_notifier(p1);

    parent.borrow_mut().add_child(&cref).expect("add_child");

    let mut lp = PollLoop::new();
    lp.add(&pref).expect("add");
    assert!(child.borrow().member_of().is_some());

    parent.borrow_mut().remove_child(&cref).expect("remove_child");
    assert!(child.borrow().member_of().is_none());
    assert_eq!(child.borrow().parent_id(), None);
    assert_eq!(parent.borrow().child_count(), 0);
    assert_eq!(lp.interest().len(), 1);

    // Not a child anymore.
    assert!(matches!(
        parent.borrow_mut().remove_child(&cref),
        Err(LoopError::NotAChild)
    ));

    common::close(s1);
    common::close(s2);
    common::close(p1);
    common::close(p2);
}

#[test]
fn a_closing_child_notifies_its_parent() {
    let (s1, s2) = common::socketpair();
    let (p1, p2) = common::pipe();

    let closed_child: Rc<Cell<Option<NotifierId>>> = Rc::new(Cell::new(None));

    let parent = Notifier::builder()
        .handle(Handle::new(s1))
        .on_read_ready(|_, _| {})
        .on_child_closed({
            let closed = closed_child.clone();
            move |_, child| closed.set(Some(child))
        })
        .build()
        .expect("notifier config");
    let pref: NotifierRef = parent.clone();

    let stream = BufferedStream::builder()
        .read_handle(Handle::new(p1))
        .on_incoming_data(|buf, _| {
            buf.clear();
            false
        })
        .build()
        .expect("stream config");
    let sref: NotifierRef = stream.clone();
    let stream_id = stream.borrow().notifier().id();

    parent.borrow_mut().add_child(&sref).expect("add_child");

    let mut lp = PollLoop::new();
    lp.add(&pref).expect("add");

    // Writer side goes away; the stream observes the half-close and
    // withdraws itself.
    common::close(p2);
    lp.loop_once(Some(SHORT)).expect("wait");

    assert_eq!(closed_child.get(), Some(stream_id));
    assert!(stream.borrow().notifier().member_of().is_none());
    assert_eq!(stream.borrow().notifier().parent_id(), None);
    assert_eq!(parent.borrow().child_count(), 0);
    assert!(
        parent.borrow().member_of().is_some(),
        "the parent stays registered"
    );

    common::close(s1);
    common::close(s2);
    common::close(p1);
}
