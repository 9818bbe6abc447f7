use anyhow::Result;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use kmon_core::ktypes::{self, Category, Ktype};

pub struct TermPrinted;

pub trait TermPrintable {
    fn term_print(&self) -> Result<TermPrinted>;
}

impl TermPrintable for String {
    fn term_print(&self) -> Result<TermPrinted> {
        println!("{self}");
        Ok(TermPrinted)
    }
}

/// Row of the kernel event types listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KtypeOverview {
    pub name: String,
    pub category: Category,
    pub hash: u32,
    pub rundown: bool,
    pub composite: bool,
    pub description: &'static str,
}

impl From<Ktype> for KtypeOverview {
    fn from(ktype: Ktype) -> Self {
        Self {
            name: ktype.name().into_owned(),
            category: ktype.category(),
            hash: ktype.name_hash(),
            rundown: ktype.is_rundown(),
            composite: ktype.is_composite(),
            description: ktype.description(),
        }
    }
}

/// Every named kernel event type, wire types first, then the composites.
pub fn ktypes_table() -> Vec<KtypeOverview> {
    ktypes::all()
        .chain(ktypes::composites())
        .map(|(ktype, _)| KtypeOverview::from(ktype))
        .collect()
}

impl TermPrintable for Vec<KtypeOverview> {
    fn term_print(&self) -> Result<TermPrinted> {
        let sorted = {
            let mut tmp = self.clone();
            tmp.sort_by(|a, b| a.category.cmp(&b.category).then(a.name.cmp(&b.name)));
            tmp
        };

        let mut table = table();

        table.set_header(vec![
            Cell::new("NAME").add_attribute(Attribute::Bold),
            Cell::new("CATEGORY").add_attribute(Attribute::Bold),
            Cell::new("HASH").add_attribute(Attribute::Bold),
            Cell::new("RUNDOWN").add_attribute(Attribute::Bold),
            Cell::new("DESCRIPTION").add_attribute(Attribute::Bold),
        ]);

        for ktype in sorted {
            let name_color = if ktype.composite {
                Color::Magenta
            } else {
                Color::Cyan
            };
            let rundown = if ktype.rundown {
                Cell::new("yes").fg(Color::Yellow)
            } else {
                Cell::new("no")
            };

            table.add_row(vec![
                Cell::new(ktype.name)
                    .fg(name_color)
                    .add_attribute(Attribute::Bold),
                Cell::new(ktype.category).fg(Color::Blue),
                Cell::new(format!("{:#010x}", ktype.hash)),
                rundown,
                Cell::new(ktype.description),
            ]);
        }

        println!("{table}");
        Ok(TermPrinted)
    }
}

fn table() -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table
}
