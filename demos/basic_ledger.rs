//! Basic ledger usage example

use backoffice_ledger::{
    observability, patterns, BusinessEvent, Ledger, MemoryStorage, PurchaseInvoice, ReceiptItem,
    SalesInvoice, SalesItem, StockReceipt, StockUnit, TreasuryDirection, TreasuryTransaction,
    TrialBalanceLevel,
};
use bigdecimal::BigDecimal;
use chrono::NaiveDate;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    observability::init();
    println!("Backoffice Ledger - Basic Example\n");

    let mut ledger = Ledger::new(MemoryStorage::new());

    // 1. Chart of accounts
    let accounts = ledger.setup_standard_chart_of_accounts().await?;
    println!("Chart of accounts: {} accounts", accounts.len());
    let provisioned = ledger.ensure_system_accounts().await?;
    println!("System accounts provisioned at startup: {}\n", provisioned.len());

    let day = |d: u32| NaiveDate::from_ymd_opt(2024, 3, d).ok_or("invalid date");

    // 2. Business events
    let opening = patterns::opening_balance(
        "OPEN-2024".to_string(),
        day(1)?,
        "11010101",
        "3101",
        BigDecimal::from(20000),
    )?;
    ledger.post_business_event(BusinessEvent::Manual(opening)).await?;

    let mut purchase = PurchaseInvoice::new("PUR-001", day(2)?, BigDecimal::from(3000));
    purchase.supplier_id = Some("SUP-1".to_string());
    purchase.tax = BigDecimal::from(420);
    ledger.post_business_event(BusinessEvent::PurchaseInvoice(purchase)).await?;

    ledger
        .post_business_event(BusinessEvent::StockReceipt(StockReceipt {
            reference_no: "GRN-001".to_string(),
            date: day(3)?,
            warehouse_id: "MAIN".to_string(),
            items: vec![ReceiptItem {
                product_id: "CHAIR".to_string(),
                quantity: BigDecimal::from(60),
                unit: StockUnit::Each,
                unit_cost: BigDecimal::from(50),
            }],
            supplier_document: Some("PUR-001".to_string()),
        }))
        .await?;

    let mut sale = SalesInvoice::new("INV-001", day(10)?, Some("CUST-1"));
    sale.items.push(SalesItem {
        product_id: "CHAIR".to_string(),
        warehouse_id: Some("MAIN".to_string()),
        quantity: BigDecimal::from(12),
        unit: StockUnit::Each,
        price: BigDecimal::from(1200),
    });
    sale.tax = BigDecimal::from(168);
    sale.discount = BigDecimal::from(50);
    let entry = ledger.post_business_event(BusinessEvent::SalesInvoice(sale)).await?;
    println!("Posted {} with {} lines:", entry.reference_no, entry.lines.len());
    for line in &entry.lines {
        println!(
            "  {:<10} Dr {:>10}  Cr {:>10}  {}",
            line.account_code,
            line.debit,
            line.credit,
            line.description.as_deref().unwrap_or("")
        );
    }

    ledger
        .post_business_event(BusinessEvent::TreasuryTransaction(TreasuryTransaction {
            reference_no: "RCV-001".to_string(),
            date: day(20)?,
            direction: TreasuryDirection::Inbound,
            treasury_account: None,
            target_account: "110201".to_string(),
            amount: BigDecimal::from(1000),
            description: Some("Partial payment from CUST-1".to_string()),
            cost_center: None,
        }))
        .await?;

    // 3. Reports
    let statement = ledger.statement("110201", Some(day(1)?), Some(day(31)?)).await?;
    println!("\nStatement of {} ({})", statement.account_code, statement.account_name);
    for row in &statement.rows {
        println!(
            "  {} {:<8} Dr {:>8} Cr {:>8} Balance {:>8}",
            row.date, row.reference_no, row.debit, row.credit, row.balance
        );
    }

    let trial_balance = ledger
        .trial_balance(TrialBalanceLevel::Roots, Some(day(1)?), Some(day(31)?))
        .await?;
    println!("\nTrial balance (roots):");
    for node in &trial_balance.rows {
        println!(
            "  {:<4} {:<12} Dr {:>10} Cr {:>10} Closing {:>10}",
            node.code, node.name, node.period_debit, node.period_credit, node.closing
        );
    }
    println!("  Balanced: {}", trial_balance.is_balanced);

    let dashboard = ledger.dashboard(day(1)?, day(31)?).await?;
    println!("\nDashboard");
    println!("  Sales:       {}", dashboard.period_sales);
    println!("  Cash:        {}", dashboard.cash);
    println!("  Receivables: {}", dashboard.receivables);
    println!("  Payables:    {}", dashboard.payables);
    println!("  Stock value: {}", dashboard.stock_value);

    // 4. Correcting a document
    ledger.reverse_by_reference("RCV-001").await?;
    let report = ledger.validate_integrity(day(31)?).await?;
    println!("\nIntegrity after deleting RCV-001: valid = {}", report.is_valid);

    Ok(())
}
