use cfl_expr::{
    ApplyExpr, CompoundExpr, ConsumerId, Expr, ForeignLambda, Lambda, Prototype, QueryId, RunId,
    TopLevelContext,
};
use cfl_host::{QueryDriver, QueryEvent, StepOutcome, TicketFailure, TicketReady, TicketSrc};
use cfl_reduce::{ReduceError, TicketRequestError, TicketSource};
use tokio::sync::mpsc;

fn foreign(name: &str) -> Lambda {
    Lambda::Foreign(ForeignLambda::new(
        name,
        Prototype::new().with_param("x").with_output("y"),
        "bash",
        format!("{name} $x > $y"),
    ))
}

fn apply(name: &str, x: &str) -> ApplyExpr {
    ApplyExpr::new(CompoundExpr::single(foreign(name)), 1).with_binding("x", CompoundExpr::strs([x]))
}

fn context(targets: Vec<ApplyExpr>) -> TopLevelContext {
    let mut ctx = TopLevelContext::new();
    for target in targets {
        ctx.add_target(CompoundExpr::single(target));
    }
    ctx
}

fn scheduler() -> (TicketSrc, mpsc::UnboundedReceiver<TicketReady>) {
    let (cre_tx, cre_rx) = mpsc::unbounded_channel();
    (TicketSrc::new(RunId::new(), cre_tx), cre_rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<TicketReady>) -> Vec<TicketReady> {
    let mut out = Vec::new();
    while let Ok(ready) = rx.try_recv() {
        out.push(ready);
    }
    out
}

fn failure_of(ready: &TicketReady) -> TicketFailure {
    TicketFailure {
        ticket: ready.ticket.id(),
        lambda: ready.ticket.lambda().name.clone(),
        script: ready.ticket.script().to_string(),
        stdout: String::new(),
        stderr: "exit status 1".into(),
    }
}

#[tokio::test]
async fn identical_applications_share_one_dispatch() {
    let (source, mut cre_rx) = scheduler();
    let _a = source.attach(ConsumerId(1));
    let _b = source.attach(ConsumerId(2));

    let first = source
        .request_ticket(ConsumerId(1), QueryId::new(), &apply("f", "5"))
        .unwrap();
    let second = source
        .request_ticket(ConsumerId(2), QueryId::new(), &apply("f", "5"))
        .unwrap();
    let other = source
        .request_ticket(ConsumerId(2), QueryId::new(), &apply("f", "6"))
        .unwrap();

    assert_eq!(first, second);
    assert_ne!(first.ticket, other.ticket);
    assert_eq!(first.output, "y");
    assert_eq!(drain(&mut cre_rx).len(), 2);
}

#[tokio::test]
async fn failure_reaches_every_dependent_query_and_evicts() {
    let (source, mut cre_rx) = scheduler();
    let mut events_a = source.attach(ConsumerId(1));
    let mut events_b = source.attach(ConsumerId(2));
    let mut events_c = source.attach(ConsumerId(3));

    let mut driver_a = QueryDriver::new(ConsumerId(1), context(vec![apply("f", "5")]), source.clone());
    let mut driver_b = QueryDriver::new(ConsumerId(2), context(vec![apply("f", "5")]), source.clone());
    let mut bystander = QueryDriver::new(ConsumerId(3), context(vec![apply("f", "6")]), source.clone());
    assert!(matches!(driver_a.step().unwrap(), StepOutcome::Pending(_)));
    assert!(matches!(driver_b.step().unwrap(), StepOutcome::Pending(_)));
    assert!(matches!(bystander.step().unwrap(), StepOutcome::Pending(_)));

    let dispatched = drain(&mut cre_rx);
    assert_eq!(dispatched.len(), 2);
    let failing = dispatched
        .iter()
        .find(|ready| ready.query == driver_a.query())
        .expect("ticket dispatched for the first query");
    source.ticket_failed(failure_of(failing));

    for (events, query) in [(&mut events_a, driver_a.query()), (&mut events_b, driver_b.query())] {
        match events.try_recv().unwrap() {
            QueryEvent::QueryFailed { query: failed, failure } => {
                assert_eq!(failed, query);
                assert_eq!(failure.stderr, "exit status 1");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }
    assert!(source.cached(&failing.ticket.id()).is_none());
    assert_eq!(driver_a.step().unwrap(), StepOutcome::Failed);

    // A query waiting on another ticket hears nothing and keeps waiting.
    assert!(events_c.try_recv().is_err());
    assert!(!source.is_queue_clear(bystander.query()));
    assert!(!source.is_failed(bystander.query()));

    // Identical request after the failure dispatches again.
    let mut retry = QueryDriver::new(ConsumerId(1), context(vec![apply("f", "5")]), source.clone());
    assert!(matches!(retry.step().unwrap(), StepOutcome::Pending(_)));
    let redispatched = drain(&mut cre_rx);
    assert_eq!(redispatched.len(), 1);
    assert_eq!(redispatched[0].ticket.id(), failing.ticket.id());
}

#[tokio::test]
async fn failure_after_a_sibling_finished_ends_the_query() {
    let (source, mut cre_rx) = scheduler();
    let mut events = source.attach(ConsumerId(1));
    let mut driver = QueryDriver::new(
        ConsumerId(1),
        context(vec![apply("f", "1"), apply("g", "2")]),
        source.clone(),
    );
    assert!(matches!(driver.step().unwrap(), StepOutcome::Pending(_)));
    let dispatched = drain(&mut cre_rx);
    assert_eq!(dispatched.len(), 2);

    source.ticket_finished(dispatched[0].ticket.id(), vec![CompoundExpr::strs(["one"])], Vec::new());
    source.ticket_failed(failure_of(&dispatched[1]));

    // The progress event is still queued ahead of the failure, but the query
    // must not read as clear when it is handled.
    assert!(matches!(events.try_recv().unwrap(), QueryEvent::TicketFinished { .. }));
    assert!(!source.is_queue_clear(driver.query()));
    assert_eq!(driver.step().unwrap(), StepOutcome::Failed);
    assert!(matches!(events.try_recv().unwrap(), QueryEvent::QueryFailed { .. }));
    assert!(drain(&mut cre_rx).is_empty());
}

#[tokio::test]
async fn nested_placeholder_keeps_query_pending() {
    let (source, mut cre_rx) = scheduler();
    let _events = source.attach(ConsumerId(1));

    // Another query keeps `f` running; this one only holds its placeholder.
    let placeholder = source
        .request_ticket(ConsumerId(1), QueryId::new(), &apply("f", "1"))
        .unwrap();
    let running = drain(&mut cre_rx);
    let target = ApplyExpr::new(CompoundExpr::single(foreign("g")), 1)
        .with_binding("x", CompoundExpr::single(placeholder));
    let mut driver = QueryDriver::new(ConsumerId(1), context(vec![target]), source.clone());
    assert!(source.is_queue_clear(driver.query()));

    let StepOutcome::Pending(partial) = driver.step().unwrap() else {
        panic!("query with an unresolved ticket inside an application must stay pending");
    };
    assert!(matches!(partial.single_exprs(), [Expr::Apply(_)]));

    source.ticket_finished(running[0].ticket.id(), vec![CompoundExpr::strs(["a.txt"])], Vec::new());
    assert!(matches!(driver.step().unwrap(), StepOutcome::Pending(_)));
    let next = drain(&mut cre_rx);
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].ticket.lambda().name, "g");
    assert_eq!(next[0].ticket.bindings()["x"], CompoundExpr::strs(["a.txt"]));
}

#[tokio::test]
async fn query_with_several_tickets_waits_for_all() {
    let (source, mut cre_rx) = scheduler();
    let mut events = source.attach(ConsumerId(1));
    let mut driver = QueryDriver::new(
        ConsumerId(1),
        context(vec![apply("f", "1"), apply("g", "2")]),
        source.clone(),
    );

    assert!(matches!(driver.step().unwrap(), StepOutcome::Pending(_)));
    let dispatched = drain(&mut cre_rx);
    assert_eq!(dispatched.len(), 2);

    source.ticket_finished(dispatched[0].ticket.id(), vec![CompoundExpr::strs(["one"])], Vec::new());
    assert!(matches!(events.try_recv().unwrap(), QueryEvent::TicketFinished { .. }));
    assert!(!source.is_queue_clear(driver.query()));

    source.ticket_finished(dispatched[1].ticket.id(), vec![CompoundExpr::strs(["two"])], Vec::new());
    assert!(matches!(events.try_recv().unwrap(), QueryEvent::TicketFinished { .. }));
    assert!(source.is_queue_clear(driver.query()));

    assert_eq!(
        driver.step().unwrap(),
        StepOutcome::Finished(CompoundExpr::strs(["one", "two"]))
    );
}

#[tokio::test]
async fn output_feeds_the_next_application() {
    let (source, mut cre_rx) = scheduler();
    let _events = source.attach(ConsumerId(1));

    let mut ctx = TopLevelContext::new();
    ctx.bind("first", CompoundExpr::single(apply("f", "1")));
    ctx.add_target(CompoundExpr::single(
        ApplyExpr::new(CompoundExpr::single(foreign("g")), 1)
            .with_binding("x", CompoundExpr::single(Expr::name("first"))),
    ));
    let mut driver = QueryDriver::new(ConsumerId(1), ctx, source.clone());

    let StepOutcome::Pending(partial) = driver.step().unwrap() else {
        panic!("expected pending query");
    };
    assert!(matches!(partial.single_exprs(), [Expr::Apply(_)]));
    let first = drain(&mut cre_rx);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].ticket.lambda().name, "f");

    source.ticket_finished(first[0].ticket.id(), vec![CompoundExpr::strs(["a.txt"])], Vec::new());
    assert!(matches!(driver.step().unwrap(), StepOutcome::Pending(_)));
    let second = drain(&mut cre_rx);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].ticket.lambda().name, "g");
    assert_eq!(second[0].ticket.bindings()["x"], CompoundExpr::strs(["a.txt"]));

    source.ticket_finished(second[0].ticket.id(), vec![CompoundExpr::strs(["b.txt"])], Vec::new());
    assert_eq!(
        driver.step().unwrap(),
        StepOutcome::Finished(CompoundExpr::strs(["b.txt"]))
    );
}

#[tokio::test]
async fn unattached_consumer_is_rejected() {
    let (source, mut cre_rx) = scheduler();
    let mut driver = QueryDriver::new(ConsumerId(9), context(vec![apply("f", "5")]), source);

    let err = driver.step().unwrap_err();
    assert!(matches!(
        err,
        ReduceError::Ticket(TicketRequestError::UnknownConsumer(ConsumerId(9)))
    ));
    assert!(drain(&mut cre_rx).is_empty());
}
