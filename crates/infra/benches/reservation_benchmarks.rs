use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{Days, Utc};
use florist_core::{CustomerId, Entity, Money, OrderId, StockItemId};
use florist_infra::ledger::{self, LedgerOp};
use florist_infra::{CreateOrder, Florist, InMemoryStore, OrderInputs, Store};
use florist_inventory::{NewStockItem, ReservationPool, StockCategory};
use florist_orders::OrderState;
use florist_products::RecipeInput;

fn item_id(i: usize) -> StockItemId {
    StockItemId::new(format!("flower-{i:04}"))
}

fn seeded(items: usize) -> Florist<InMemoryStore> {
    let florist = Florist::new(InMemoryStore::new());
    for i in 0..items {
        florist
            .create_stock_item(NewStockItem {
                id: item_id(i),
                category: StockCategory::Flower,
                name: format!("Flower {i}"),
                variety: None,
                colour: None,
                location: None,
                unit_cost: Money::from_cents(120),
                stock_total: 1_000_000,
            })
            .unwrap();
    }
    florist
}

fn order_cmd(lines: usize) -> CreateOrder {
    CreateOrder {
        order_id: OrderId::new(),
        customer_id: CustomerId::new(),
        fulfilment_date: Utc::now().date_naive() + Days::new(5),
        delivery_address: None,
        pickup_at_store: true,
        inputs: OrderInputs::Lines {
            lines: (0..lines)
                .map(|i| RecipeInput {
                    stock_item_id: item_id(i),
                    quantity: 3,
                })
                .collect(),
        },
        sale_price: Some(Money::from_cents(5_000)),
        deposit: Money::ZERO,
        notes: None,
    }
}

/// Create an order, cancel it and delete it; the store ends as it started.
fn bench_order_capture_cancel(c: &mut Criterion) {
    let mut group = c.benchmark_group("order_capture_cancel");

    for lines in [1usize, 8, 32].iter() {
        group.throughput(Throughput::Elements(*lines as u64));
        group.bench_with_input(BenchmarkId::new("lines", lines), lines, |b, &lines| {
            let florist = seeded(lines);
            b.iter(|| {
                let created = florist.create_order(black_box(order_cmd(lines))).unwrap();
                let id = *created.order.id();
                florist.cancel_order(id, None).unwrap();
                florist.delete_order(id).unwrap();
            });
        });
    }

    group.finish();
}

/// Full workshop path: capture, consume at the reserved quantities, cancel
/// (returns the consumed units) and delete.
fn bench_order_workshop_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("order_workshop_cycle");
    group.throughput(Throughput::Elements(8));

    group.bench_function("consume_then_cancel", |b| {
        let florist = seeded(8);
        b.iter(|| {
            let created = florist.create_order(order_cmd(8)).unwrap();
            let id = *created.order.id();
            florist
                .transition_order_state(id, OrderState::Workshop, None)
                .unwrap();
            florist
                .transition_order_state(id, OrderState::PickupAtStore, None)
                .unwrap();
            florist.cancel_order(id, None).unwrap();
            florist.delete_order(id).unwrap();
        });
    });

    group.finish();
}

/// Raw ledger batches inside a transaction that is rolled back each time.
fn bench_ledger_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_batch");

    for items in [16usize, 256].iter() {
        group.throughput(Throughput::Elements(*items as u64 * 2));
        group.bench_with_input(BenchmarkId::new("reserve_release", items), items, |b, &items| {
            let florist = seeded(items);
            b.iter(|| {
                let mut tx = florist.store().begin().unwrap();
                let ops = (0..items)
                    .rev()
                    .flat_map(|i| {
                        [
                            LedgerOp::Reserve {
                                pool: ReservationPool::Events,
                                item_id: item_id(i),
                                quantity: 7,
                            },
                            LedgerOp::Release {
                                pool: ReservationPool::Events,
                                item_id: item_id(i),
                                quantity: 7,
                            },
                        ]
                    })
                    .collect();
                black_box(ledger::apply(&mut tx, ops).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_order_capture_cancel,
    bench_order_workshop_cycle,
    bench_ledger_batch
);
criterion_main!(benches);
