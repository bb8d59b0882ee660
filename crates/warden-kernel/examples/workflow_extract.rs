//! An extraction workflow inside a transaction: navigate, extract, then
//! roll the tab's navigation state back before committing.

use warden_kernel::capability::{Constraints, RiskTier};
use warden_kernel::config::{Kernel, KernelConfig};

const SCRIPT: &str = r#"
import browser

browser.txn.begin()
let tab = browser.tab.open("https://search.example.com/results")
let links = browser.tab.extract(tab, "links")
browser.txn.rollback()
browser.txn.commit()

let texts = []
for link in links.links {
    texts = texts + [link.text]
}
return texts
"#;

fn main() -> Result<(), warden_kernel::error::KernelError> {
    let kernel = Kernel::init(KernelConfig::default())?;
    kernel.broker.grant(
        "agent:2",
        "tab.**",
        "*",
        RiskTier::Stateful,
        None,
        Constraints::none(),
    )?;

    let result = kernel.runtime.execute(SCRIPT, "agent:2", None);
    println!("state={} value={:?}", result.state.as_str(), result.return_value);

    kernel.shutdown()?;
    Ok(())
}
