use std::{collections::BTreeMap, str::FromStr};

use serde::Serialize;
use ttf_parser::{Face, GlyphId};

use crate::database::error::{Error, HtmlError, TypeError};

// DejaVu Sans covers Latin and Cyrillic
static FONT_DATA: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");
const FONT_NAME: &str = "DejaVuSans";

const CSV_BOM: &str = "\u{feff}";
const RECIPES_HEADER: &str = "Recipes:";
const INGREDIENTS_HEADER: &str = "Shopping list:";

// Page layout in PDF points
const PAGE_WIDTH: i32 = 595;
const PAGE_HEIGHT: i32 = 842;
const FONT_SIZE: i32 = 12;
const X_POS: i32 = 100;
const X_END_POS: i32 = 300;
const Y_POS: i32 = 800;
const BOTTOM_MARGIN: i32 = 50;
const SM_INDENT_STEP: i32 = 10;
const MD_INDENT_STEP: i32 = 20;
const DIVIDER_INDENT_STEP: i32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Pdf,
}

impl FromStr for ExportFormat {
    type Err = TypeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "csv" => Ok(Self::Csv),
            "pdf" => Ok(Self::Pdf),
            _ => Err(TypeError::new(
                "ATTACHMENT_FORMAT_ERROR Please contact your administrator",
            )),
        }
    }
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Pdf => "application/pdf",
        }
    }

    pub fn filename(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "shopping_list.csv",
            ExportFormat::Pdf => "shopping_cart.pdf",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShoppingItem {
    pub name: String,
    pub measurement_unit: String,
    pub amount: i64,
}

impl ShoppingItem {
    pub fn line(&self) -> String {
        format!("{} ({}) --- {}", self.name, self.measurement_unit, self.amount)
    }
}

/// Recipe names and summed ingredient totals of a user's shopping list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShoppingList {
    pub recipes: Vec<String>,
    pub ingredients: Vec<ShoppingItem>,
}

impl ShoppingList {
    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty() && self.ingredients.is_empty()
    }
}

/// A rendered document ready to be sent as a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub content_type: &'static str,
    pub filename: &'static str,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.filename)
    }
}

pub fn render(list: &ShoppingList, format: ExportFormat) -> Result<Attachment, Error> {
    let bytes = match format {
        ExportFormat::Csv => render_csv(list)?,
        ExportFormat::Pdf => render_pdf(list)?,
    };

    Ok(Attachment {
        content_type: format.content_type(),
        filename: format.filename(),
        bytes,
    })
}

fn render_csv(list: &ShoppingList) -> Result<Vec<u8>, Error> {
    let mut writer = csv::Writer::from_writer(CSV_BOM.as_bytes().to_vec());
    let csv_error = |e: csv::Error| HtmlError::Internal.new(&format!("Failed to write csv: {e}"));

    writer.write_record([RECIPES_HEADER]).map_err(csv_error)?;
    for recipe in &list.recipes {
        writer
            .write_record([format!("# {recipe}")])
            .map_err(csv_error)?;
    }
    writer.write_record([" "]).map_err(csv_error)?;
    writer.write_record([INGREDIENTS_HEADER]).map_err(csv_error)?;
    for item in &list.ingredients {
        writer.write_record([item.line()]).map_err(csv_error)?;
    }

    writer
        .into_inner()
        .map_err(|e| HtmlError::Internal.new(&format!("Failed to flush csv: {e}")))
}

fn render_pdf(list: &ShoppingList) -> Result<Vec<u8>, Error> {
    let mut canvas = PdfCanvas::new()?;

    canvas.draw_string(RECIPES_HEADER);
    for recipe in &list.recipes {
        canvas.draw_string(&format!("# {recipe}"));
    }
    canvas.skip(SM_INDENT_STEP);
    canvas.divider();
    canvas.skip(DIVIDER_INDENT_STEP);
    canvas.draw_string(INGREDIENTS_HEADER);
    for item in &list.ingredients {
        canvas.draw_string(&item.line());
    }

    Ok(canvas.save())
}

fn font_face() -> Result<Face<'static>, Error> {
    Face::parse(FONT_DATA, 0)
        .map_err(|e| HtmlError::Internal.new(&format!("Failed to load pdf font: {e}")))
}

/// Glyph ids of `text` as an Identity-H hex string. Missing glyphs map to `.notdef`.
fn encode_glyphs(face: &Face, text: &str, used: &mut BTreeMap<u16, char>) -> String {
    let mut hex = String::with_capacity(text.len() * 4);
    for c in text.chars() {
        let glyph = face.glyph_index(c).map(|g| g.0).unwrap_or(0);
        used.entry(glyph).or_insert(c);
        hex.push_str(&format!("{glyph:04X}"));
    }
    hex
}

fn utf16_hex(c: char) -> String {
    let mut units = [0u16; 2];
    c.encode_utf16(&mut units)
        .iter()
        .map(|unit| format!("{unit:04X}"))
        .collect()
}

fn stream(dictionary: &str, data: &[u8]) -> Vec<u8> {
    let mut object = format!("<< /Length {} {dictionary}>>\nstream\n", data.len()).into_bytes();
    object.extend_from_slice(data);
    object.extend_from_slice(b"\nendstream");
    object
}

/// Single font, single column text layout over A4 pages.
struct PdfCanvas {
    face: Face<'static>,
    used: BTreeMap<u16, char>,
    pages: Vec<String>,
    current: String,
    y: i32,
}

impl PdfCanvas {
    fn new() -> Result<Self, Error> {
        Ok(Self {
            face: font_face()?,
            used: BTreeMap::new(),
            pages: vec![],
            current: String::new(),
            y: Y_POS,
        })
    }

    fn show_page(&mut self) {
        self.pages.push(std::mem::take(&mut self.current));
        self.y = Y_POS;
    }

    fn make_room(&mut self) {
        if self.y < BOTTOM_MARGIN {
            self.show_page();
        }
    }

    fn draw_string(&mut self, text: &str) {
        self.make_room();
        let glyphs = encode_glyphs(&self.face, text, &mut self.used);
        self.current.push_str(&format!(
            "BT /F1 {FONT_SIZE} Tf {X_POS} {} Td <{glyphs}> Tj ET\n",
            self.y
        ));
        self.y -= MD_INDENT_STEP;
    }

    fn divider(&mut self) {
        self.make_room();
        self.current
            .push_str(&format!("{X_POS} {y} m {X_END_POS} {y} l S\n", y = self.y));
    }

    fn skip(&mut self, step: i32) {
        self.y -= step;
    }

    /// Scales font units to the 1000 unit glyph space.
    fn scale(&self, value: i32) -> i32 {
        value * 1000 / i32::from(self.face.units_per_em())
    }

    fn widths(&self) -> String {
        self.used
            .keys()
            .map(|glyph| {
                let advance = self
                    .face
                    .glyph_hor_advance(GlyphId(*glyph))
                    .map(i32::from)
                    .unwrap_or(0);
                format!("{glyph} [{}]", self.scale(advance))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn font_descriptor(&self) -> String {
        let bbox = self.face.global_bounding_box();
        let ascent = self.scale(self.face.ascender().into());
        let descent = self.scale(self.face.descender().into());
        let cap_height = self
            .face
            .capital_height()
            .map(|h| self.scale(h.into()))
            .unwrap_or(ascent);

        format!(
            "<< /Type /FontDescriptor /FontName /{FONT_NAME} /Flags 32 \
             /FontBBox [{} {} {} {}] /ItalicAngle 0 /Ascent {ascent} /Descent {descent} \
             /CapHeight {cap_height} /StemV 80 /FontFile2 6 0 R >>",
            self.scale(bbox.x_min.into()),
            self.scale(bbox.y_min.into()),
            self.scale(bbox.x_max.into()),
            self.scale(bbox.y_max.into()),
        )
    }

    /// Maps glyph ids back to text so the document stays searchable.
    fn to_unicode(&self) -> String {
        let mut cmap = String::from(
            "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
             /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
             /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
             1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
        );
        let entries: Vec<(&u16, &char)> = self.used.iter().collect();
        // bfchar blocks hold at most 100 entries
        for chunk in entries.chunks(100) {
            cmap.push_str(&format!("{} beginbfchar\n", chunk.len()));
            for (glyph, c) in chunk {
                cmap.push_str(&format!("<{glyph:04X}> <{}>\n", utf16_hex(**c)));
            }
            cmap.push_str("endbfchar\n");
        }
        cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend");
        cmap
    }

    fn save(mut self) -> Vec<u8> {
        if !self.current.is_empty() || self.pages.is_empty() {
            self.show_page();
        }

        // 1: catalog, 2: page tree, 3-7: font objects, then a (page, contents) pair per page
        let page_ids: Vec<usize> = (0..self.pages.len()).map(|i| 8 + 2 * i).collect();
        let kids = page_ids
            .iter()
            .map(|id| format!("{id} 0 R"))
            .collect::<Vec<_>>()
            .join(" ");

        let mut objects: Vec<Vec<u8>> = vec![
            b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
            format!(
                "<< /Type /Pages /Kids [{kids}] /Count {} >>",
                self.pages.len()
            )
            .into_bytes(),
            format!(
                "<< /Type /Font /Subtype /Type0 /BaseFont /{FONT_NAME} /Encoding /Identity-H \
                 /DescendantFonts [4 0 R] /ToUnicode 7 0 R >>"
            )
            .into_bytes(),
            format!(
                "<< /Type /Font /Subtype /CIDFontType2 /BaseFont /{FONT_NAME} \
                 /CIDSystemInfo << /Registry (Adobe) /Ordering (Identity) /Supplement 0 >> \
                 /FontDescriptor 5 0 R /CIDToGIDMap /Identity /DW 1000 /W [{}] >>",
                self.widths()
            )
            .into_bytes(),
            self.font_descriptor().into_bytes(),
            stream(&format!("/Length1 {} ", FONT_DATA.len()), FONT_DATA),
            stream("", self.to_unicode().as_bytes()),
        ];
        for (page, id) in self.pages.iter().zip(&page_ids) {
            objects.push(
                format!(
                    "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
                     /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
                    id + 1
                )
                .into_bytes(),
            );
            objects.push(stream("", page.as_bytes()));
        }

        let mut document = b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n".to_vec();
        let mut offsets = Vec::with_capacity(objects.len());
        for (i, object) in objects.iter().enumerate() {
            offsets.push(document.len());
            document.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
            document.extend_from_slice(object);
            document.extend_from_slice(b"\nendobj\n");
        }

        let xref_offset = document.len();
        let mut trailer = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
        for offset in offsets {
            trailer.push_str(&format!("{offset:010} 00000 n \n"));
        }
        trailer.push_str(&format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            objects.len() + 1
        ));
        document.extend_from_slice(trailer.as_bytes());

        document
    }
}
